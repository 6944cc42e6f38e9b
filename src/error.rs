use std::{error, fmt};

/// SCRAM mechanism error cases.
///
/// Every failure is terminal for the session that produced it: the caller
/// should drop the session and start a new conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required credential was not supplied before stepping.
    Configuration(Field),
    /// The random number generator could not produce the client nonce.
    Entropy,
    /// A value could not be encoded, decoded or prepared. `Encoding` contains
    /// further information.
    Encoding(Encoding),
    /// A server message wasn't formatted as required. `Kind` contains further
    /// information.
    ///
    /// RFC 5802 section 7 describes the format of the exchanged messages.
    Protocol(Kind),
    /// The server rejected the authentication request or couldn't be
    /// validated.
    Verification(Verification),
    /// A message didn't fit into the available buffer space.
    Buffer(Buffer),
}

/// Kinds of encoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// A server message or password was not valid UTF-8.
    Utf8,
    /// The content of the field `Field` was not valid base64.
    Base64(Field),
    /// The password contains a codepoint prohibited by SASLprep, or an
    /// unassigned codepoint.
    SaslProhibited,
    /// The password violates the SASLprep bidirectional text requirements.
    SaslBidi,
    /// The password requires SASLprep but the crate was built without the
    /// `saslprep` feature.
    SaslUnavailable,
}

/// Kinds of protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// A server message contained an attribute key this client doesn't know.
    UnknownAttribute(char),
    /// An attribute was not of the form `k=v`.
    Malformed,
    /// The field `Field` was expected but not found.
    ExpectedField(Field),
    /// The server responded with a nonce that doesn't start with the nonce
    /// sent in the first client message.
    InvalidNonce,
    /// The content of the field `Field` is invalid.
    InvalidField(Field),
    /// The server requested fewer key derivation rounds than the minimum of
    /// 4096. Accepting it would aid downgrade attacks.
    IterationCountTooLow(u32),
    /// The conversation was already complete or had already failed.
    MaximumSteps,
}

/// Kinds of server verification failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The server reported an authentication error in its final message.
    ServerError(String),
    /// The final server message carried no verifier.
    MissingVerifier,
    /// The server signature did not match the expected value. The server
    /// does not know the salted password.
    SignatureMismatch,
}

/// Buffers that can run out of space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffer {
    /// The caller-provided output buffer.
    Output,
    /// The internal authentication message buffer.
    AuthMessage,
}

/// Fields used in the exchanged messages and the session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// User name
    User,
    /// Password
    Password,
    /// Nonce
    Nonce,
    /// Salt
    Salt,
    /// Iteration count
    Iterations,
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(Field::User) => write!(fmt, "SCRAM: user name is not set"),
            Error::Configuration(field) => write!(fmt, "SCRAM: {field:?} is not set"),
            Error::Entropy => write!(
                fmt,
                "SCRAM: could not generate a cryptographically secure nonce"
            ),
            Error::Encoding(kind) => write!(fmt, "SCRAM: {kind}"),
            Error::Protocol(kind) => write!(fmt, "SCRAM protocol error: {kind}"),
            Error::Verification(kind) => write!(fmt, "SCRAM verification failed: {kind}"),
            Error::Buffer(Buffer::Output) => {
                write!(fmt, "SCRAM: could not buffer the outgoing message")
            }
            Error::Buffer(Buffer::AuthMessage) => {
                write!(fmt, "SCRAM: could not buffer the authentication message")
            }
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(fmt, "invalid UTF-8"),
            Encoding::Base64(field) => write!(fmt, "invalid base64 in {field:?}"),
            Encoding::SaslProhibited => {
                write!(fmt, "password contains a codepoint prohibited by SASLprep")
            }
            Encoding::SaslBidi => write!(
                fmt,
                "password violates the SASLprep bidirectional requirements"
            ),
            Encoding::SaslUnavailable => write!(
                fmt,
                "password requires SASLprep but the `saslprep` feature is disabled"
            ),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::UnknownAttribute(key) => write!(fmt, "unknown attribute key '{key}'"),
            Kind::Malformed => write!(fmt, "malformed attribute"),
            Kind::ExpectedField(field) => write!(fmt, "expected field {field:?}"),
            Kind::InvalidNonce => write!(fmt, "client nonce not repeated by the server"),
            Kind::InvalidField(field) => write!(fmt, "invalid field {field:?}"),
            Kind::IterationCountTooLow(count) => {
                write!(fmt, "iteration count {count} is below the minimum of 4096")
            }
            Kind::MaximumSteps => write!(fmt, "maximum steps reached"),
        }
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::ServerError(message) => write!(fmt, "server reported: {message}"),
            Verification::MissingVerifier => write!(fmt, "no verifier in the final message"),
            Verification::SignatureMismatch => write!(fmt, "server signature mismatch"),
        }
    }
}

impl error::Error for Error {}
