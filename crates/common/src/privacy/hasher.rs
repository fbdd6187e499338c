use sha2::{Digest, Sha256};

use crate::error::{CommonError, CommonResult};

/// Salted SHA-256 digests over a sequence of string fields
///
/// Fields are length-prefixed before hashing so that `("ab", "c")` and
/// `("a", "bc")` never collide.
#[derive(Clone)]
pub struct SecureHasher {
    salt: String,
}

impl std::fmt::Debug for SecureHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureHasher").field("salt", &"<redacted>").finish()
    }
}

impl SecureHasher {
    pub fn new(salt: impl Into<String>) -> CommonResult<Self> {
        let salt = salt.into();
        if salt.is_empty() {
            return Err(CommonError::config_field("salt", "salt must be set"));
        }
        Ok(Self { salt })
    }

    /// Lowercase hex digest of the salt followed by every field
    pub fn hash_fields(&self, fields: &[&str]) -> String {
        let mut hasher = Sha256::new();
        Self::absorb(&mut hasher, &self.salt);
        for field in fields {
            Self::absorb(&mut hasher, field);
        }
        hex::encode(hasher.finalize())
    }

    fn absorb(hasher: &mut Sha256, field: &str) {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
}
