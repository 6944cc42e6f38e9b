//! SASLprep (RFC 4013), the stringprep profile applied to SCRAM-SHA-256
//! passwords before key derivation.
//!
//! The small stringprep tables (the mapping tables, the prohibited-output
//! tables and the RandALCat ranges of RFC 3454) are embedded here as sorted
//! range tables. The two tables derived from the full Unicode database, A.1
//! unassigned code points and D.2 LCat, come from the `stringprep` crate.

use std::borrow::Cow;

use crate::error::{Encoding, Error};

/// Returns whether `password` needs preparation at all.
///
/// Strings made of ASCII printable characters (32..=126) are their own
/// SASLprep output, so the expensive pipeline can be skipped for them. This
/// predicate is also what keeps builds without the `saslprep` feature useful.
pub(crate) fn is_required(password: &str) -> bool {
    !password.bytes().all(|byte| (32..=126).contains(&byte))
}

/// Prepares a password per RFC 4013, borrowing when nothing needs to change.
pub(crate) fn prepare(password: &str) -> Result<Cow<'_, str>, Error> {
    if !is_required(password) {
        return Ok(Cow::Borrowed(password));
    }
    prepare_full(password).map(Cow::Owned)
}

#[cfg(not(feature = "saslprep"))]
fn prepare_full(_password: &str) -> Result<String, Error> {
    Err(Error::Encoding(Encoding::SaslUnavailable))
}

#[cfg(feature = "saslprep")]
fn prepare_full(password: &str) -> Result<String, Error> {
    use unicode_normalization::UnicodeNormalization;

    use crate::utf8;

    let bytes = password.as_bytes();
    let count = utf8::string_length(bytes).ok_or(Error::Encoding(Encoding::Utf8))?;

    // map (RFC 4013 section 2.1): B.1 deletes, C.1.2 becomes SPACE. B.1
    // wins for the codepoints listed in both tables.
    let mut mapped = Vec::with_capacity(count);
    let mut rest = bytes;
    while let Some(&first) = rest.first() {
        let length = utf8::char_length(first);
        let code = utf8::to_codepoint(&rest[..length]);
        rest = &rest[length..];

        if utf8::is_in_table(code, MAPPED_TO_NOTHING) {
            continue;
        }
        if utf8::is_in_table(code, NON_ASCII_SPACE) {
            mapped.push(0x20);
        } else {
            mapped.push(code);
        }
    }

    let mut encoded = Vec::with_capacity(mapped.len() * 4);
    let mut buf = [0u8; 4];
    for &code in &mapped {
        let length = utf8::from_codepoint(code, &mut buf).ok_or(Error::Encoding(Encoding::Utf8))?;
        encoded.extend_from_slice(&buf[..length]);
    }
    let mapped = String::from_utf8(encoded).map_err(|_| Error::Encoding(Encoding::Utf8))?;

    // normalize (section 2.2): Unicode normalization form KC
    let normalized: String = mapped.nfkc().collect();

    // prohibit (section 2.3), including unassigned codepoints (section 2.5)
    for c in normalized.chars() {
        if is_prohibited(c) {
            return Err(Error::Encoding(Encoding::SaslProhibited));
        }
    }

    // bidi (section 2.4, via RFC 3454 section 6)
    check_bidi(&normalized)?;

    Ok(normalized)
}

#[cfg(feature = "saslprep")]
fn is_prohibited(c: char) -> bool {
    use crate::utf8::is_in_table;

    let code = c as u32;
    PROHIBITED_OUTPUT
        .iter()
        .any(|table| is_in_table(code, table))
        || stringprep::tables::unassigned_code_point(c)
}

/// RFC 3454 section 6: a string containing RandALCat characters must not
/// contain any LCat character and must both start and end with a RandALCat
/// character.
#[cfg(feature = "saslprep")]
fn check_bidi(s: &str) -> Result<(), Error> {
    use crate::utf8::is_in_table;

    let mut contains_randal = false;
    let mut contains_l = false;
    for c in s.chars() {
        if is_in_table(c as u32, RANDALCAT) {
            contains_randal = true;
        } else if stringprep::tables::bidi_l(c) {
            contains_l = true;
        }
    }

    if !contains_randal {
        return Ok(());
    }

    let first_ok = s
        .chars()
        .next()
        .is_some_and(|c| is_in_table(c as u32, RANDALCAT));
    let last_ok = s
        .chars()
        .next_back()
        .is_some_and(|c| is_in_table(c as u32, RANDALCAT));

    if contains_l || !first_ok || !last_ok {
        return Err(Error::Encoding(Encoding::SaslBidi));
    }
    Ok(())
}

/// RFC 3454 table B.1, commonly mapped to nothing.
#[cfg(feature = "saslprep")]
const MAPPED_TO_NOTHING: &[[u32; 2]] = &[
    [0x00ad, 0x00ad],
    [0x034f, 0x034f],
    [0x1806, 0x1806],
    [0x180b, 0x180d],
    [0x200b, 0x200d],
    [0x2060, 0x2060],
    [0xfe00, 0xfe0f],
    [0xfeff, 0xfeff],
];

/// RFC 3454 table C.1.2, non-ASCII space characters.
#[cfg(feature = "saslprep")]
const NON_ASCII_SPACE: &[[u32; 2]] = &[
    [0x00a0, 0x00a0],
    [0x1680, 0x1680],
    [0x2000, 0x200b],
    [0x202f, 0x202f],
    [0x205f, 0x205f],
    [0x3000, 0x3000],
];

/// RFC 3454 table C.2.1, ASCII control characters.
#[cfg(feature = "saslprep")]
const ASCII_CONTROL: &[[u32; 2]] = &[[0x0000, 0x001f], [0x007f, 0x007f]];

/// RFC 3454 table C.2.2, non-ASCII control characters.
#[cfg(feature = "saslprep")]
const NON_ASCII_CONTROL: &[[u32; 2]] = &[
    [0x0080, 0x009f],
    [0x06dd, 0x06dd],
    [0x070f, 0x070f],
    [0x180e, 0x180e],
    [0x200c, 0x200d],
    [0x2028, 0x2029],
    [0x2060, 0x2063],
    [0x206a, 0x206f],
    [0xfeff, 0xfeff],
    [0xfff9, 0xfffc],
    [0x1d173, 0x1d17a],
];

/// RFC 3454 table C.3, private use.
#[cfg(feature = "saslprep")]
const PRIVATE_USE: &[[u32; 2]] = &[
    [0xe000, 0xf8ff],
    [0xf0000, 0xffffd],
    [0x100000, 0x10fffd],
];

/// RFC 3454 table C.4, non-character code points.
#[cfg(feature = "saslprep")]
const NON_CHARACTER: &[[u32; 2]] = &[
    [0xfdd0, 0xfdef],
    [0xfffe, 0xffff],
    [0x1fffe, 0x1ffff],
    [0x2fffe, 0x2ffff],
    [0x3fffe, 0x3ffff],
    [0x4fffe, 0x4ffff],
    [0x5fffe, 0x5ffff],
    [0x6fffe, 0x6ffff],
    [0x7fffe, 0x7ffff],
    [0x8fffe, 0x8ffff],
    [0x9fffe, 0x9ffff],
    [0xafffe, 0xaffff],
    [0xbfffe, 0xbffff],
    [0xcfffe, 0xcffff],
    [0xdfffe, 0xdffff],
    [0xefffe, 0xeffff],
    [0xffffe, 0xfffff],
    [0x10fffe, 0x10ffff],
];

/// RFC 3454 table C.5, surrogate codes.
#[cfg(feature = "saslprep")]
const SURROGATES: &[[u32; 2]] = &[[0xd800, 0xdfff]];

/// RFC 3454 table C.6, inappropriate for plain text.
#[cfg(feature = "saslprep")]
const PLAIN_TEXT_INAPPROPRIATE: &[[u32; 2]] = &[[0xfff9, 0xfffd]];

/// RFC 3454 table C.7, inappropriate for canonical representation.
#[cfg(feature = "saslprep")]
const CANONICAL_INAPPROPRIATE: &[[u32; 2]] = &[[0x2ff0, 0x2ffb]];

/// RFC 3454 table C.8, change display properties or deprecated.
#[cfg(feature = "saslprep")]
const DISPLAY_DEPRECATED: &[[u32; 2]] = &[
    [0x0340, 0x0341],
    [0x200e, 0x200f],
    [0x202a, 0x202e],
    [0x206a, 0x206f],
];

/// RFC 3454 table C.9, tagging characters.
#[cfg(feature = "saslprep")]
const TAGGING: &[[u32; 2]] = &[[0xe0001, 0xe0001], [0xe0020, 0xe007f]];

/// The prohibited output of RFC 4013 section 2.3, except table A.1.
#[cfg(feature = "saslprep")]
const PROHIBITED_OUTPUT: &[&[[u32; 2]]] = &[
    NON_ASCII_SPACE,
    ASCII_CONTROL,
    NON_ASCII_CONTROL,
    PRIVATE_USE,
    NON_CHARACTER,
    SURROGATES,
    PLAIN_TEXT_INAPPROPRIATE,
    CANONICAL_INAPPROPRIATE,
    DISPLAY_DEPRECATED,
    TAGGING,
];

/// RFC 3454 table D.1, characters with bidirectional category R or AL.
#[cfg(feature = "saslprep")]
const RANDALCAT: &[[u32; 2]] = &[
    [0x05be, 0x05be],
    [0x05c0, 0x05c0],
    [0x05c3, 0x05c3],
    [0x05d0, 0x05ea],
    [0x05f0, 0x05f4],
    [0x061b, 0x061b],
    [0x061f, 0x061f],
    [0x0621, 0x063a],
    [0x0640, 0x064a],
    [0x066d, 0x066f],
    [0x0671, 0x06d5],
    [0x06dd, 0x06dd],
    [0x06e5, 0x06e6],
    [0x06fa, 0x06fe],
    [0x0700, 0x070d],
    [0x0710, 0x0710],
    [0x0712, 0x072c],
    [0x0780, 0x07a5],
    [0x07b1, 0x07b1],
    [0x200f, 0x200f],
    [0xfb1d, 0xfb1d],
    [0xfb1f, 0xfb28],
    [0xfb2a, 0xfb36],
    [0xfb38, 0xfb3c],
    [0xfb3e, 0xfb3e],
    [0xfb40, 0xfb41],
    [0xfb43, 0xfb44],
    [0xfb46, 0xfbb1],
    [0xfbd3, 0xfd3d],
    [0xfd50, 0xfd8f],
    [0xfd92, 0xfdc7],
    [0xfdf0, 0xfdfc],
    [0xfe70, 0xfe74],
    [0xfe76, 0xfefc],
];
