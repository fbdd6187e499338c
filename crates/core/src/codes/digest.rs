use perkgate_common::error::CommonResult;
use perkgate_common::SecureHasher;
use perkgate_domain::TenantId;

/// One-way digest of a plaintext code, scoped to its tenant
///
/// The same six digits in two tenants produce unrelated digests, and without
/// the pepper the 10^6 code space cannot be enumerated offline.
#[derive(Debug, Clone)]
pub struct CodeHasher {
    inner: SecureHasher,
}

impl CodeHasher {
    pub fn new(pepper: &str) -> CommonResult<Self> {
        Ok(Self { inner: SecureHasher::new(pepper)? })
    }

    pub fn digest(&self, tenant_id: &TenantId, code: &str) -> String {
        self.inner.hash_fields(&[tenant_id.as_str(), code])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_tenant_scoped() {
        let hasher = CodeHasher::new("pepper").unwrap();
        let t1 = TenantId::new("T1");
        let t2 = TenantId::new("T2");

        assert_eq!(hasher.digest(&t1, "482913"), hasher.digest(&t1, "482913"));
        assert_ne!(hasher.digest(&t1, "482913"), hasher.digest(&t2, "482913"));
        assert_ne!(hasher.digest(&t1, "482913"), "482913");
    }

    #[test]
    fn test_empty_pepper_rejected() {
        assert!(CodeHasher::new("").is_err());
    }
}
