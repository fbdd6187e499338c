//! Shared building blocks for the perkgate crates.
//!
//! # Feature Tiers
//!
//! - `foundation`: errors, serde helpers, privacy hashing
//! - `runtime`: resilience primitives (circuit breaker, retry, clock)
//! - `observability`: tracing for runtime modules

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod privacy;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "foundation")]
pub use privacy::SecureHasher;
#[cfg(feature = "runtime")]
pub use resilience::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, MockClock, RetryConfig,
    RetryError, RetryExecutor, SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, duration_secs};
