//! Full three-message conversations against a minimal in-test server.
//!
//! The server fixture performs the server side of RFC 5802 on its own,
//! straight on top of ring, `stringprep::saslprep` and the MongoDB password
//! digest, so agreement between the two ends actually validates the
//! client's derivations.

use std::num::NonZeroU32;
use std::str;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use data_encoding::HEXLOWER;
use md5::{Digest, Md5};
use rand::{CryptoRng, RngCore};
use ring::{digest, hmac, pbkdf2};

use mongo_scram::{Error, Kind, ScramClient, ScramVersion, Verification};

/// Yields one byte value forever, for reproducible nonces.
struct FixedRng(u8);

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        u32::from_ne_bytes([self.0; 4])
    }

    fn next_u64(&mut self) -> u64 {
        u64::from_ne_bytes([self.0; 8])
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(self.0);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for FixedRng {}

struct TestServer {
    version: ScramVersion,
    expected_user: String,
    salted_password: Vec<u8>,
    salt: Vec<u8>,
    iterations: u32,
    nonce_suffix: String,
    client_first_bare: String,
    server_first: String,
}

impl TestServer {
    fn new(
        version: ScramVersion,
        user: &str,
        password: &str,
        salt: Vec<u8>,
        iterations: u32,
    ) -> Self {
        let normalized = match version {
            ScramVersion::Sha1 => {
                let mut md5 = Md5::new();
                md5.update(format!("{user}:mongo:{password}"));
                HEXLOWER.encode(md5.finalize().as_slice())
            }
            ScramVersion::Sha256 => stringprep::saslprep(password).unwrap().into_owned(),
        };

        let algorithm = match version {
            ScramVersion::Sha1 => pbkdf2::PBKDF2_HMAC_SHA1,
            ScramVersion::Sha256 => pbkdf2::PBKDF2_HMAC_SHA256,
        };
        let mut salted_password = vec![0u8; hash_len(version)];
        pbkdf2::derive(
            algorithm,
            NonZeroU32::new(iterations).unwrap(),
            &salt,
            normalized.as_bytes(),
            &mut salted_password,
        );

        TestServer {
            version,
            expected_user: escape_user(user),
            salted_password,
            salt,
            iterations,
            nonce_suffix: "t8m2CngeLkhxLdyS".to_string(),
            client_first_bare: String::new(),
            server_first: String::new(),
        }
    }

    fn handle_client_first(&mut self, message: &str) -> String {
        let bare = message.strip_prefix("n,,").unwrap();
        let rest = bare.strip_prefix(&format!("n={},r=", self.expected_user)).unwrap();
        assert_eq!(rest.len(), 32, "client nonce should be 32 base64 chars");

        self.client_first_bare = bare.to_string();
        self.server_first = format!(
            "r={}{},s={},i={}",
            rest,
            self.nonce_suffix,
            BASE64.encode(&self.salt),
            self.iterations
        );
        self.server_first.clone()
    }

    fn handle_client_final(&mut self, message: &str) -> String {
        let (without_proof, proof) = message.split_once(",p=").unwrap();
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, self.server_first, without_proof
        );

        let client_key = self.hmac(&self.salted_password, b"Client Key");
        let stored_key = self.hash(&client_key);
        let client_signature = self.hmac(&stored_key, auth_message.as_bytes());
        let expected: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(key, signature)| key ^ signature)
            .collect();

        match BASE64.decode(proof) {
            Ok(received) if received == expected => {
                let server_key = self.hmac(&self.salted_password, b"Server Key");
                let server_signature = self.hmac(&server_key, auth_message.as_bytes());
                format!("v={}", BASE64.encode(server_signature))
            }
            _ => "e=authentication failed".to_string(),
        }
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        let algorithm = match self.version {
            ScramVersion::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            ScramVersion::Sha256 => &digest::SHA256,
        };
        digest::digest(algorithm, data).as_ref().to_vec()
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let algorithm = match self.version {
            ScramVersion::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            ScramVersion::Sha256 => hmac::HMAC_SHA256,
        };
        let key = hmac::Key::new(algorithm, key);
        hmac::sign(&key, data).as_ref().to_vec()
    }
}

fn hash_len(version: ScramVersion) -> usize {
    match version {
        ScramVersion::Sha1 => 20,
        ScramVersion::Sha256 => 32,
    }
}

fn escape_user(user: &str) -> String {
    let mut escaped = String::new();
    for c in user.chars() {
        match c {
            ',' => escaped.push_str("=2C"),
            '=' => escaped.push_str("=3D"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn salt_for(version: ScramVersion, fill: u8) -> Vec<u8> {
    vec![fill; hash_len(version) - 4]
}

fn client_for(version: ScramVersion, user: &str, password: &str, seed: u8) -> ScramClient {
    let mut client = ScramClient::with_rng(version, FixedRng(seed));
    client.set_user(user);
    client.set_password(password);
    client
}

/// Runs the full three-step conversation, returning the client-final
/// message for inspection.
fn drive(client: &mut ScramClient, server: &mut TestServer) -> Result<String, Error> {
    let mut buf = [0u8; 4096];

    let written = client.step(b"", &mut buf)?;
    let client_first = str::from_utf8(&buf[..written]).unwrap().to_string();
    let server_first = server.handle_client_first(&client_first);

    let written = client.step(server_first.as_bytes(), &mut buf)?;
    let client_final = str::from_utf8(&buf[..written]).unwrap().to_string();
    let server_final = server.handle_client_final(&client_final);

    client.step(server_final.as_bytes(), &mut buf)?;
    Ok(client_final)
}

#[test]
fn sha1_conversation_succeeds() {
    let version = ScramVersion::Sha1;
    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0xa5), 4096);
    let mut client = client_for(version, "user", "pencil", 1);

    drive(&mut client, &mut server).unwrap();
    assert!(client.cache().is_some());
}

#[test]
fn sha256_conversation_succeeds() {
    let version = ScramVersion::Sha256;
    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0x5a), 4096);
    let mut client = client_for(version, "user", "pencil", 2);

    drive(&mut client, &mut server).unwrap();
    assert!(client.cache().is_some());
}

#[test]
fn sha1_conversation_is_deterministic_for_a_fixed_nonce() {
    let version = ScramVersion::Sha1;
    let mut first_final = String::new();
    for _ in 0..2 {
        let mut server =
            TestServer::new(version, "user", "pencil", salt_for(version, 0xa5), 4096);
        let mut client = client_for(version, "user", "pencil", 9);
        let client_final = drive(&mut client, &mut server).unwrap();
        if first_final.is_empty() {
            first_final = client_final;
        } else {
            assert_eq!(first_final, client_final);
        }
    }
}

#[cfg(feature = "saslprep")]
#[test]
fn sha256_prepares_non_ascii_passwords() {
    let version = ScramVersion::Sha256;
    // the fixture normalizes through stringprep::saslprep, the client
    // through its own pipeline; the conversation only succeeds if both
    // agree
    for password in ["p\u{00e9}ncil", "pe\u{2168}cil", "I\u{00ad}X"] {
        let mut server = TestServer::new(version, "user", password, salt_for(version, 0x33), 4096);
        let mut client = client_for(version, "user", password, 3);
        drive(&mut client, &mut server).unwrap();
    }
}

#[test]
fn wrong_password_is_rejected_by_the_server() {
    let version = ScramVersion::Sha256;
    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0x5a), 4096);
    let mut client = client_for(version, "user", "eraser", 4);

    let error = drive(&mut client, &mut server).unwrap_err();
    assert_eq!(
        error,
        Error::Verification(Verification::ServerError("authentication failed".into()))
    );
    assert!(client.cache().is_none());
}

#[test]
fn commas_and_equals_in_the_user_name_are_escaped() {
    let version = ScramVersion::Sha1;
    let mut server = TestServer::new(version, "a,b=c", "pencil", salt_for(version, 0x11), 4096);
    let mut client = client_for(version, "a,b=c", "pencil", 5);

    let mut buf = [0u8; 4096];
    let written = client.step(b"", &mut buf).unwrap();
    let client_first = str::from_utf8(&buf[..written]).unwrap();
    assert!(client_first.starts_with("n,,n=a=2Cb=3Dc,r="));

    let server_first = server.handle_client_first(client_first);
    let written = client.step(server_first.as_bytes(), &mut buf).unwrap();
    let server_final = server.handle_client_final(str::from_utf8(&buf[..written]).unwrap());
    client.step(server_final.as_bytes(), &mut buf).unwrap();
}

#[test]
fn low_iteration_count_aborts_before_the_proof() {
    let version = ScramVersion::Sha1;
    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0x11), 1024);
    let mut client = client_for(version, "user", "pencil", 6);

    let error = drive(&mut client, &mut server).unwrap_err();
    assert_eq!(error, Error::Protocol(Kind::IterationCountTooLow(1024)));
}

#[test]
fn short_salt_aborts_the_exchange() {
    let version = ScramVersion::Sha1;
    let mut server = TestServer::new(version, "user", "pencil", vec![0x11; 10], 4096);
    let mut client = client_for(version, "user", "pencil", 7);

    let error = drive(&mut client, &mut server).unwrap_err();
    assert_eq!(
        error,
        Error::Protocol(Kind::InvalidField(mongo_scram::Field::Salt))
    );
}

#[test]
fn tampered_server_nonce_aborts_the_exchange() {
    let version = ScramVersion::Sha1;
    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0x11), 4096);
    let mut client = client_for(version, "user", "pencil", 8);

    let mut buf = [0u8; 4096];
    let written = client.step(b"", &mut buf).unwrap();
    let client_first = str::from_utf8(&buf[..written]).unwrap().to_string();
    let server_first = server.handle_client_first(&client_first);
    // replace the repeated client nonce with an attacker-chosen one
    let tampered = format!("r=X{}", &server_first[3..]);

    let error = client.step(tampered.as_bytes(), &mut buf).unwrap_err();
    assert_eq!(error, Error::Protocol(Kind::InvalidNonce));
}

#[test]
fn forged_server_final_error_surfaces_and_leaves_no_cache() {
    let version = ScramVersion::Sha1;
    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0x11), 4096);
    let mut client = client_for(version, "user", "pencil", 9);

    let mut buf = [0u8; 4096];
    let written = client.step(b"", &mut buf).unwrap();
    let client_first = str::from_utf8(&buf[..written]).unwrap().to_string();
    let server_first = server.handle_client_first(&client_first);
    client.step(server_first.as_bytes(), &mut buf).unwrap();

    let error = client.step(b"e=other-error", &mut buf).unwrap_err();
    assert_eq!(
        error,
        Error::Verification(Verification::ServerError("other-error".into()))
    );
    assert!(client.cache().is_none());
}

#[test]
fn cached_secrets_reproduce_the_client_final_message() {
    let version = ScramVersion::Sha256;
    let salt = salt_for(version, 0x42);

    let mut server = TestServer::new(version, "user", "pencil", salt.clone(), 4096);
    let mut first = client_for(version, "user", "pencil", 10);
    let cold_final = drive(&mut first, &mut server).unwrap();
    let cache = first.cache().unwrap();

    // same credentials, salt and nonces: the cached secrets must produce a
    // byte-identical client-final-message
    let mut server = TestServer::new(version, "user", "pencil", salt, 4096);
    let mut second = client_for(version, "user", "pencil", 10);
    second.set_cache(Some(cache));
    let warm_final = drive(&mut second, &mut server).unwrap();

    assert_eq!(cold_final, warm_final);
}

#[test]
fn a_different_salt_misses_the_cache_but_still_authenticates() {
    let version = ScramVersion::Sha256;

    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0x42), 4096);
    let mut first = client_for(version, "user", "pencil", 11);
    drive(&mut first, &mut server).unwrap();

    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0x43), 4096);
    let mut second = client_for(version, "user", "pencil", 11);
    second.set_cache(first.cache());
    drive(&mut second, &mut server).unwrap();
}

#[test]
fn cache_transfers_between_hash_variants_never_match() {
    // a SHA-1 entry can't satisfy a SHA-256 session; the salt lengths and
    // hashed passwords both differ, so the session derives fresh secrets
    let mut server = TestServer::new(
        ScramVersion::Sha1,
        "user",
        "pencil",
        salt_for(ScramVersion::Sha1, 0x21),
        4096,
    );
    let mut sha1 = client_for(ScramVersion::Sha1, "user", "pencil", 12);
    drive(&mut sha1, &mut server).unwrap();

    let mut server = TestServer::new(
        ScramVersion::Sha256,
        "user",
        "pencil",
        salt_for(ScramVersion::Sha256, 0x21),
        4096,
    );
    let mut sha256 = client_for(ScramVersion::Sha256, "user", "pencil", 12);
    sha256.set_cache(sha1.cache());
    drive(&mut sha256, &mut server).unwrap();
}

#[test]
fn stepping_past_the_end_fails() {
    let version = ScramVersion::Sha1;
    let mut server = TestServer::new(version, "user", "pencil", salt_for(version, 0xa5), 4096);
    let mut client = client_for(version, "user", "pencil", 13);
    drive(&mut client, &mut server).unwrap();

    let mut buf = [0u8; 4096];
    assert_eq!(
        client.step(b"v=anything", &mut buf).unwrap_err(),
        Error::Protocol(Kind::MaximumSteps)
    );
}
