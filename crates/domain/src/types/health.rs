//! Health reporting types

use serde::{Deserialize, Serialize};

/// Which of the two stores served or accepted a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Primary,
    Mirror,
}

crate::impl_domain_status_conversions!(BackendKind {
    Primary => "primary",
    Mirror => "mirror",
});

impl BackendKind {
    pub fn other(&self) -> Self {
        match self {
            BackendKind::Primary => BackendKind::Mirror,
            BackendKind::Mirror => BackendKind::Primary,
        }
    }
}

/// Externally visible operating mode; the two labels are a fixed contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthMode {
    Normal,
    Degraded,
}

crate::impl_domain_status_conversions!(HealthMode {
    Normal => "normal",
    Degraded => "degraded",
});

/// Breaker view of one backend, for logs and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend: BackendKind,
    pub adapter: String,
    pub breaker_state: String,
    pub consecutive_failures: u32,
}

/// Result of a health check
///
/// Only `mode` is serialized; backend detail stays in-process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub mode: HealthMode,
    #[serde(skip)]
    pub backends: Vec<BackendHealth>,
}

impl HealthReport {
    pub fn new(mode: HealthMode) -> Self {
        Self { mode, backends: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_wire_contract() {
        let report = HealthReport {
            mode: HealthMode::Degraded,
            backends: vec![BackendHealth {
                backend: BackendKind::Primary,
                adapter: "postgres".into(),
                breaker_state: "OPEN".into(),
                consecutive_failures: 3,
            }],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"mode":"degraded"}"#);
        assert_eq!(HealthMode::Normal.to_string(), "normal");
    }

    #[test]
    fn test_backend_kind_other() {
        assert_eq!(BackendKind::Primary.other(), BackendKind::Mirror);
        assert_eq!(BackendKind::Mirror.other(), BackendKind::Primary);
    }
}
