//! The client side of the SCRAM conversation.

use std::fmt;
use std::num::NonZeroU32;
use std::str;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::cache::ScramCache;
use crate::crypto::{self, NonceRng, ScramVersion};
use crate::error::{Buffer, Encoding, Error, Field, Kind, Verification};
use crate::saslprep;
use crate::{MIN_ITERATIONS, NONCE_LENGTH};

const GS2_HEADER: &[u8] = b"n,,";
const CLIENT_KEY: &[u8] = b"Client Key";
const SERVER_KEY: &[u8] = b"Server Key";

/// Step value of a session that failed; every later call reports
/// `Kind::MaximumSteps`.
const STEP_FAILED: u8 = u8::MAX;

/// A single SCRAM authentication conversation.
///
/// The session is driven by the enclosing SASL exchange: each call to
/// [`step`](ScramClient::step) consumes the latest server payload and
/// produces the next client payload.
///
/// ```no_run
/// # fn main() -> Result<(), mongo_scram::Error> {
/// use mongo_scram::{ScramClient, ScramVersion};
///
/// let mut client = ScramClient::new(ScramVersion::Sha256);
/// client.set_user("user");
/// client.set_password("pencil");
///
/// let mut buf = [0u8; 4096];
/// let written = client.step(b"", &mut buf)?;
/// // send buf[..written] to the server, feed its reply into the next step
/// # let _ = written;
/// # Ok(())
/// # }
/// ```
///
/// A session is single use. After a successful third step the server is
/// authenticated; after any error the session is terminal and should be
/// dropped. The password and every derived secret are overwritten with
/// zeros on drop, whichever step was reached.
pub struct ScramClient {
    version: ScramVersion,
    step: u8,
    user: Option<String>,
    pass: Option<Zeroizing<String>>,
    rng: Box<dyn NonceRng>,
    encoded_nonce: String,
    auth_message: AuthMessage,
    hashed_password: Option<Zeroizing<String>>,
    decoded_salt: Zeroizing<Vec<u8>>,
    iterations: u32,
    salted_password: Option<Zeroizing<Vec<u8>>>,
    client_key: Option<Zeroizing<Vec<u8>>>,
    server_key: Option<Zeroizing<Vec<u8>>>,
    cache: Option<ScramCache>,
}

impl ScramClient {
    /// Creates a session for the given SCRAM variant, drawing the client
    /// nonce from the operating system.
    pub fn new(version: ScramVersion) -> Self {
        Self::with_rng(version, OsRng)
    }

    /// Creates a session with a custom nonce source. Please only use a
    /// cryptographically secure random number generator.
    pub fn with_rng<R>(version: ScramVersion, rng: R) -> Self
    where
        R: RngCore + CryptoRng + 'static,
    {
        ScramClient {
            version,
            step: 0,
            user: None,
            pass: None,
            rng: Box::new(rng),
            encoded_nonce: String::new(),
            auth_message: AuthMessage::new(),
            hashed_password: None,
            decoded_salt: Zeroizing::new(Vec::new()),
            iterations: 0,
            salted_password: None,
            client_key: None,
            server_key: None,
            cache: None,
        }
    }

    /// The variant this session authenticates with.
    pub fn version(&self) -> ScramVersion {
        self.version
    }

    /// Sets the name used for authentication. Required before the first
    /// step. `,` and `=` are escaped on the wire per RFC 5802.
    pub fn set_user(&mut self, user: &str) {
        self.user = Some(user.to_owned());
    }

    /// Sets the password. Required before the second step. The previous
    /// value, if any, is zeroized.
    pub fn set_password(&mut self, password: &str) {
        self.pass = Some(Zeroizing::new(password.to_owned()));
    }

    /// Replaces the attached cache entry with a deep copy of `cache`, or
    /// detaches it entirely.
    pub fn set_cache(&mut self, cache: Option<ScramCache>) {
        self.cache = cache;
    }

    /// A deep copy of the attached cache entry, transferable to another
    /// session via [`set_cache`](ScramClient::set_cache).
    pub fn cache(&self) -> Option<ScramCache> {
        self.cache.clone()
    }

    /// Advances the conversation by one step.
    ///
    /// * Step 1 ignores `inbuf` and writes the client-first-message.
    /// * Step 2 consumes the server-first-message and writes the
    ///   client-final-message.
    /// * Step 3 consumes the server-final-message and writes nothing; on
    ///   success the server is authenticated and the cache updated.
    ///
    /// Returns the number of bytes written into `outbuf`. The capacity of
    /// `outbuf` at step 1 also fixes the capacity of the internal
    /// authentication message buffer; messages that would overflow either
    /// fail the step instead of reallocating.
    pub fn step(&mut self, inbuf: &[u8], outbuf: &mut [u8]) -> Result<usize, Error> {
        self.step = self.step.saturating_add(1);
        let result = match self.step {
            1 => self.client_first(outbuf),
            2 => self.client_final(inbuf, outbuf),
            3 => self.verify_server_final(inbuf),
            _ => Err(Error::Protocol(Kind::MaximumSteps)),
        };
        if result.is_err() {
            self.step = STEP_FAILED;
        }
        result
    }

    /// Generates the client-first-message:
    /// `n,,n=escaped-username,r=client-nonce`.
    fn client_first(&mut self, outbuf: &mut [u8]) -> Result<usize, Error> {
        let user = match self.user.as_deref() {
            Some(user) if !user.is_empty() => user,
            _ => return Err(Error::Configuration(Field::User)),
        };

        // the conversation transcript is bounded by the caller's buffer
        self.auth_message.reset(outbuf.len());

        let mut raw_nonce = [0u8; NONCE_LENGTH];
        self.rng.fill(&mut raw_nonce)?;
        self.encoded_nonce = crypto::b64_encode(&raw_nonce);

        let mut out = OutBuf::new(outbuf);
        out.append(GS2_HEADER)?;
        out.append(b"n=")?;
        let mut encoded = [0u8; 4];
        for c in user.chars() {
            match c {
                ',' => out.append(b"=2C")?,
                '=' => out.append(b"=3D")?,
                c => out.append(c.encode_utf8(&mut encoded).as_bytes())?,
            }
        }
        out.append(b",r=")?;
        out.append(self.encoded_nonce.as_bytes())?;

        // keep everything from "n=" onward for the client proof later on
        self.auth_message.append(&out.written()[GS2_HEADER.len()..])?;
        self.auth_message.append(b",")?;

        debug!(mechanism = %self.version, "starting SCRAM conversation");
        Ok(out.len())
    }

    /// Consumes the server-first-message
    /// `r=combined-nonce,s=salt,i=iteration-count` and generates the
    /// client-final-message `c=biws,r=combined-nonce,p=client-proof`.
    fn client_final(&mut self, inbuf: &[u8], outbuf: &mut [u8]) -> Result<usize, Error> {
        let server_first = str::from_utf8(inbuf).map_err(|_| Error::Encoding(Encoding::Utf8))?;

        let user = self.user.as_deref().ok_or(Error::Configuration(Field::User))?;
        let pass = self.pass.as_deref().ok_or(Error::Configuration(Field::Password))?;
        let hashed_password: Zeroizing<String> = match self.version {
            // The password for SCRAM-SHA-1 is the MongoDB hashed variant.
            ScramVersion::Sha1 => crypto::mongo_hashed_password(user, pass),
            // SCRAM-SHA-256 passwords are prepared with SASLprep and used
            // for key derivation directly, without a digest.
            ScramVersion::Sha256 => Zeroizing::new(saslprep::prepare(pass)?.into_owned()),
        };

        self.auth_message.append(inbuf)?;
        self.auth_message.append(b",")?;

        let mut val_r = None;
        let mut val_s = None;
        let mut val_i = None;
        if !server_first.is_empty() {
            for part in server_first.split(',') {
                let (key, value) = parse_attribute(part)?;
                match key {
                    'r' => val_r = Some(value),
                    's' => val_s = Some(value),
                    'i' => val_i = Some(value),
                    other => return Err(Error::Protocol(Kind::UnknownAttribute(other))),
                }
            }
        }
        let combined_nonce =
            val_r.ok_or(Error::Protocol(Kind::ExpectedField(Field::Nonce)))?;
        let encoded_salt = val_s.ok_or(Error::Protocol(Kind::ExpectedField(Field::Salt)))?;
        let iterations =
            val_i.ok_or(Error::Protocol(Kind::ExpectedField(Field::Iterations)))?;

        // the combined nonce must extend the nonce we sent
        let nonce = self.encoded_nonce.as_bytes();
        if combined_nonce.len() < nonce.len()
            || !crypto::ct_equal(&combined_nonce.as_bytes()[..nonce.len()], nonce)
        {
            return Err(Error::Protocol(Kind::InvalidNonce));
        }

        let mut out = OutBuf::new(outbuf);
        out.append(b"c=biws,r=")?;
        out.append(combined_nonce.as_bytes())?;
        self.auth_message.append(out.written())?;
        out.append(b",p=")?;

        let decoded_salt = Zeroizing::new(
            crypto::b64_decode(encoded_salt)
                .map_err(|_| Error::Encoding(Encoding::Base64(Field::Salt)))?,
        );
        // the salt leaves room for the four-byte block index of Hi()
        if decoded_salt.len() != self.version.hash_len() - 4 {
            return Err(Error::Protocol(Kind::InvalidField(Field::Salt)));
        }

        let iterations: i64 = iterations
            .parse()
            .map_err(|_| Error::Protocol(Kind::InvalidField(Field::Iterations)))?;
        if !(0..=i64::from(u32::MAX)).contains(&iterations) {
            return Err(Error::Protocol(Kind::InvalidField(Field::Iterations)));
        }
        let iterations = iterations as u32;
        // 4096 is the minimum the driver specifications allow; anything
        // lower would aid a downgrade attack by a man in the middle
        if iterations < MIN_ITERATIONS {
            return Err(Error::Protocol(Kind::IterationCountTooLow(iterations)));
        }

        let (salted_password, cached_client_key, cached_server_key) = match &self.cache {
            Some(cache) if cache.matches(&hashed_password, &decoded_salt, iterations) => {
                debug!("reusing cached SCRAM secrets");
                (
                    cache.salted_password.clone(),
                    Some(cache.client_key.clone()),
                    Some(cache.server_key.clone()),
                )
            }
            _ => {
                let rounds = NonZeroU32::new(iterations)
                    .ok_or(Error::Protocol(Kind::InvalidField(Field::Iterations)))?;
                trace!(iterations, "deriving the salted password");
                (
                    self.version
                        .hi(hashed_password.as_bytes(), &decoded_salt, rounds),
                    None,
                    None,
                )
            }
        };

        let client_key = match cached_client_key {
            Some(key) => key,
            None => self.version.hmac(&salted_password, &[CLIENT_KEY]),
        };
        let stored_key = self.version.hash(&client_key);
        let client_signature = self
            .version
            .hmac(&stored_key, &[self.auth_message.as_bytes()]);

        let mut client_proof = Zeroizing::new(vec![0u8; self.version.hash_len()]);
        for (proof, (key, signature)) in client_proof
            .iter_mut()
            .zip(client_key.iter().zip(client_signature.iter()))
        {
            *proof = key ^ signature;
        }
        out.append(crypto::b64_encode(&client_proof).as_bytes())?;

        self.hashed_password = Some(hashed_password);
        self.decoded_salt = decoded_salt;
        self.iterations = iterations;
        self.salted_password = Some(salted_password);
        self.client_key = Some(client_key);
        self.server_key = cached_server_key;

        Ok(out.len())
    }

    /// Consumes the server-final-message, either `v=verifier` or
    /// `e=error-text`, and proves that the server knows the salted
    /// password.
    fn verify_server_final(&mut self, inbuf: &[u8]) -> Result<usize, Error> {
        let server_final = str::from_utf8(inbuf).map_err(|_| Error::Encoding(Encoding::Utf8))?;

        let mut val_e = None;
        let mut val_v = None;
        if !server_final.is_empty() {
            for part in server_final.split(',') {
                let (key, value) = parse_attribute(part)?;
                match key {
                    'e' => val_e = Some(value),
                    'v' => val_v = Some(value),
                    other => return Err(Error::Protocol(Kind::UnknownAttribute(other))),
                }
            }
        }
        if let Some(message) = val_e {
            return Err(Error::Verification(Verification::ServerError(
                message.to_owned(),
            )));
        }
        let verifier = val_v.ok_or(Error::Verification(Verification::MissingVerifier))?;

        let salted_password = self
            .salted_password
            .as_ref()
            .ok_or(Error::Protocol(Kind::MaximumSteps))?;
        let server_key = match self.server_key.take() {
            Some(key) => key,
            None => self.version.hmac(salted_password, &[SERVER_KEY]),
        };
        let server_signature = self
            .version
            .hmac(&server_key, &[self.auth_message.as_bytes()]);

        let encoded = crypto::b64_encode(&server_signature);
        if !crypto::ct_equal(encoded.as_bytes(), verifier.as_bytes()) {
            return Err(Error::Verification(Verification::SignatureMismatch));
        }
        self.server_key = Some(server_key);

        self.update_cache();
        debug!("server signature verified");
        Ok(0)
    }

    /// Replaces the cache with the presecrets and secrets of this
    /// conversation. Only called once the server has been verified.
    fn update_cache(&mut self) {
        let (Some(hashed_password), Some(salted_password), Some(client_key), Some(server_key)) = (
            &self.hashed_password,
            &self.salted_password,
            &self.client_key,
            &self.server_key,
        ) else {
            return;
        };

        self.cache = Some(ScramCache {
            hashed_password: hashed_password.clone(),
            decoded_salt: self.decoded_salt.clone(),
            iterations: self.iterations,
            salted_password: salted_password.clone(),
            client_key: client_key.clone(),
            server_key: server_key.clone(),
        });
    }
}

impl fmt::Debug for ScramClient {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ScramClient")
            .field("version", &self.version)
            .field("step", &self.step)
            .field("user", &self.user)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

/// Splits one `k=v` attribute of a server message. Keys are single
/// characters.
fn parse_attribute(part: &str) -> Result<(char, &str), Error> {
    let (key, value) = part.split_once('=').ok_or(Error::Protocol(Kind::Malformed))?;
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(key), None) => Ok((key, value)),
        _ => Err(Error::Protocol(Kind::Malformed)),
    }
}

/// The transcript used as HMAC input for both the client proof and the
/// server signature: `client-first-bare , server-first ,
/// client-final-without-proof`. Fixed capacity, appends never reallocate
/// past it.
struct AuthMessage {
    buf: Vec<u8>,
    limit: usize,
}

impl AuthMessage {
    fn new() -> Self {
        AuthMessage {
            buf: Vec::new(),
            limit: 0,
        }
    }

    fn reset(&mut self, limit: usize) {
        self.buf.clear();
        self.limit = limit;
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.buf.len() + bytes.len() > self.limit {
            return Err(Error::Buffer(Buffer::AuthMessage));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Bounds-checked writer over the caller-provided output buffer.
struct OutBuf<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> OutBuf<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        OutBuf { buf, len: 0 }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let end = self.len + bytes.len();
        if end > self.buf.len() {
            return Err(Error::Buffer(Buffer::Output));
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    fn written(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn len(&self) -> usize {
        self.len
    }
}
