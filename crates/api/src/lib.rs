//! # Perkgate API
//!
//! HTTP surface and process wiring for the redemption backend.
//!
//! This crate contains:
//! - Route handlers (`/v1/codes`, `/v1/redemptions`, `/health`)
//! - Application context (dependency injection and background tasks)
//! - The `perkgated` binary entry point
//!
//! ## Architecture
//! - Depends on `domain`, `core` and `infra`
//! - Wires up the hexagonal architecture
//! - Caller identity arrives in headers set by the upstream auth layer and is
//!   trusted verbatim

pub mod context;
pub mod error;
pub mod routes;
pub mod utils;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

pub use context::AppContext;
pub use error::ApiError;

/// Build the HTTP router over a shared context
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/v1/codes", post(routes::codes::issue_code))
        .route("/v1/codes/active", get(routes::codes::active_codes))
        .route("/v1/redemptions", post(routes::redemptions::redeem_code))
        .route("/health", get(routes::health::health))
        .with_state(ctx)
}
