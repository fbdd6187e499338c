//! Resilient code store and its wiring

pub mod factory;
pub mod resilient;

pub use factory::{breaker_config, build_adapter, build_breaker};
pub use resilient::ResilientStore;
