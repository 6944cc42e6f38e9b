//! The crypto primitives behind the SCRAM derivations: digest, HMAC, the
//! `Hi` key-stretching function, constant-time comparison and the wire
//! base64 alphabet. Everything is polymorphic over the selected hash.

use std::fmt;
use std::num::NonZeroU32;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use data_encoding::HEXLOWER;
use rand::{CryptoRng, RngCore};
use ring::{constant_time, digest, hmac, pbkdf2};
use zeroize::Zeroizing;

use crate::error::Error;

/// The hash variants of SCRAM supported by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScramVersion {
    /// SCRAM-SHA-1 with the legacy MD5 password digest.
    Sha1,
    /// SCRAM-SHA-256 with SASLprep password preparation.
    Sha256,
}

impl ScramVersion {
    /// The digest length `H` of the selected hash: 20 for SHA-1 and 32 for
    /// SHA-256. Salts must decode to exactly `H - 4` bytes.
    pub fn hash_len(self) -> usize {
        match self {
            ScramVersion::Sha1 => digest::SHA1_OUTPUT_LEN,
            ScramVersion::Sha256 => digest::SHA256_OUTPUT_LEN,
        }
    }

    fn digest_algorithm(self) -> &'static digest::Algorithm {
        match self {
            ScramVersion::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            ScramVersion::Sha256 => &digest::SHA256,
        }
    }

    fn hmac_algorithm(self) -> hmac::Algorithm {
        match self {
            ScramVersion::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            ScramVersion::Sha256 => hmac::HMAC_SHA256,
        }
    }

    fn pbkdf2_algorithm(self) -> pbkdf2::Algorithm {
        match self {
            ScramVersion::Sha1 => pbkdf2::PBKDF2_HMAC_SHA1,
            ScramVersion::Sha256 => pbkdf2::PBKDF2_HMAC_SHA256,
        }
    }

    /// `H(data)` as defined in RFC 5802.
    pub(crate) fn hash(self, data: &[u8]) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(digest::digest(self.digest_algorithm(), data).as_ref().to_vec())
    }

    /// `HMAC(key, data)` over the concatenation of `parts`.
    pub(crate) fn hmac(self, key: &[u8], parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
        let key = hmac::Key::new(self.hmac_algorithm(), key);
        let mut context = hmac::Context::with_key(&key);
        for part in parts {
            context.update(part);
        }
        Zeroizing::new(context.sign().as_ref().to_vec())
    }

    /// `Hi(secret, salt, i)` as defined in RFC 5802: PBKDF2 limited to a
    /// single output block of `H` bytes. The 4-byte big-endian block index
    /// `0x00000001` appended to the salt is why servers send salts of
    /// `H - 4` bytes.
    pub(crate) fn hi(self, secret: &[u8], salt: &[u8], iterations: NonZeroU32) -> Zeroizing<Vec<u8>> {
        let mut output = Zeroizing::new(vec![0u8; self.hash_len()]);
        pbkdf2::derive(self.pbkdf2_algorithm(), iterations, salt, secret, &mut output);
        output
    }
}

impl fmt::Display for ScramVersion {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramVersion::Sha1 => write!(fmt, "SCRAM-SHA-1"),
            ScramVersion::Sha256 => write!(fmt, "SCRAM-SHA-256"),
        }
    }
}

/// The injected randomness capability behind nonce generation. Blanket
/// implemented for every cryptographically secure `rand` generator, which
/// keeps deterministic generators usable in tests.
pub(crate) trait NonceRng {
    /// Fills `out` from the generator, or reports an entropy failure.
    fn fill(&mut self, out: &mut [u8]) -> Result<(), Error>;
}

impl<R: RngCore + CryptoRng> NonceRng for R {
    fn fill(&mut self, out: &mut [u8]) -> Result<(), Error> {
        self.try_fill_bytes(out).map_err(|_| Error::Entropy)
    }
}

/// Constant-time equality for secrets and MAC outputs. Slices of different
/// lengths compare unequal.
pub(crate) fn ct_equal(a: &[u8], b: &[u8]) -> bool {
    constant_time::verify_slices_are_equal(a, b).is_ok()
}

pub(crate) fn b64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub(crate) fn b64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(data)
}

/// The MongoDB password digest used as the SCRAM-SHA-1 presecret:
/// `HEX(MD5(user ":mongo:" password))` in lowercase.
pub(crate) fn mongo_hashed_password(user: &str, password: &str) -> Zeroizing<String> {
    use md5::{Digest, Md5};

    let mut md5 = Md5::new();
    md5.update(user.as_bytes());
    md5.update(b":mongo:");
    md5.update(password.as_bytes());
    Zeroizing::new(HEXLOWER.encode(md5.finalize().as_slice()))
}
