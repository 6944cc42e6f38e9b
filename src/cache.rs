//! Cached SCRAM secrets, keyed by the presecrets that produced them.

use std::fmt;

use zeroize::Zeroizing;

use crate::crypto::ct_equal;

/// The derived secrets of one successful authentication, reusable by later
/// sessions against the same credentials.
///
/// An entry is keyed by the presecret triple (hashed password, decoded salt,
/// iteration count). When a session holding an entry sees the same triple
/// again it copies `SaltedPassword`, `ClientKey` and `ServerKey` out of the
/// entry instead of re-running the key derivation, which dominates the cost
/// of an authentication at real-world iteration counts.
///
/// Entries are immutable; `Clone` produces a deep copy, and all secret fields
/// are overwritten with zeros when the entry is dropped. The hashed password
/// stored inside is password-equivalent and is never exposed.
#[derive(Clone)]
pub struct ScramCache {
    pub(crate) hashed_password: Zeroizing<String>,
    pub(crate) decoded_salt: Zeroizing<Vec<u8>>,
    pub(crate) iterations: u32,
    pub(crate) salted_password: Zeroizing<Vec<u8>>,
    pub(crate) client_key: Zeroizing<Vec<u8>>,
    pub(crate) server_key: Zeroizing<Vec<u8>>,
}

impl ScramCache {
    /// Whether this entry was derived from the given presecrets. The secret
    /// components are compared in constant time.
    pub(crate) fn matches(&self, hashed_password: &str, decoded_salt: &[u8], iterations: u32) -> bool {
        self.iterations == iterations
            && ct_equal(self.hashed_password.as_bytes(), hashed_password.as_bytes())
            && ct_equal(&self.decoded_salt, decoded_salt)
    }
}

impl fmt::Debug for ScramCache {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ScramCache")
            .field("iterations", &self.iterations)
            .field("salt_len", &self.decoded_salt.len())
            .finish_non_exhaustive()
    }
}
