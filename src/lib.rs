//! Salted Challenge Response Authentication Mechanism (SCRAM), client side.
//!
//! This crate implements the client half of the SCRAM conversation defined
//! by RFC 5802 as MongoDB-style drivers speak it: SCRAM-SHA-1 with the
//! legacy `MD5(user ":mongo:" password)` digest, and SCRAM-SHA-256 (RFC
//! 7677) with SASLprep (RFC 4013) password preparation. The enclosing SASL
//! exchange owns the wire; this crate only turns server payloads into
//! client payloads:
//!
//! ```text
//! step 1            -> n,,n=user,r=client-nonce
//! step 2  r=...,s=...,i=...  -> c=biws,r=...,p=client-proof
//! step 3  v=...  (server authenticated)
//! ```
//!
//! Derived secrets can be carried over between conversations through
//! [`ScramCache`] so that repeated authentications against the same
//! credentials skip the key-stretching step. All secret material is
//! overwritten with zeros when sessions and cache entries are dropped.

mod cache;
mod client;
mod crypto;
mod error;
mod saslprep;
mod utf8;

pub use cache::ScramCache;
pub use client::ScramClient;
pub use crypto::ScramVersion;
pub use error::{Buffer, Encoding, Error, Field, Kind, Verification};

/// Length in bytes of the raw client nonce. Its base64 form on the wire is
/// 32 characters.
pub const NONCE_LENGTH: usize = 24;

/// The lowest iteration count accepted from a server. RFC 5802 suggests it
/// and the MongoDB driver specifications require it.
pub const MIN_ITERATIONS: u32 = 4096;
