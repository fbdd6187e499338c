//! Resilience primitives for fault tolerance
//!
//! - **Circuit Breaker**: per-backend health gate with a CLOSED, OPEN and
//!   HALF_OPEN state machine
//! - **Retry**: bounded retry with exponential backoff and jitter
//! - **Clock**: time source shared by both so tests can drive them with
//!   [`MockClock`]

pub mod circuit_breaker;
pub mod clock;
pub mod retry;

pub use circuit_breaker::{
    BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use retry::{
    policies, BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy, RetryResult,
};
