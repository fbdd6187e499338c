//! Identifier newtypes
//!
//! Ids owned by other subsystems (tenants, students, partners, callers) are
//! opaque strings; this crate never interprets them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Partition key; every stored row and every operation is scoped by it
    TenantId
);
opaque_id!(
    /// Student or employee a code is issued to
    StudentId
);
opaque_id!(
    /// Partner whose promotion the code is for
    PartnerId
);
opaque_id!(
    /// Authenticated principal making a call, as asserted by the auth layer
    CallerIdentity
);

/// Identifier of a stored validation code, generated on issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeId(Uuid);

impl CodeId {
    /// Time-ordered id
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for CodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        let tenant = TenantId::new("T1");
        assert_eq!(serde_json::to_string(&tenant).unwrap(), "\"T1\"");
        assert_eq!(tenant.to_string(), "T1");
    }

    #[test]
    fn test_code_id_parses_back() {
        let id = CodeId::generate();
        let parsed: CodeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_code_ids_are_time_ordered() {
        let first = CodeId::generate();
        let second = CodeId::generate();
        assert!(first < second);
    }
}
