use std::time::Duration;

use tracing::{info, warn};

use crate::error::ApiError;

/// Log the outcome of a request with structured fields.
///
/// # Parameters
/// * `route` - Logical route identifier (e.g. `"codes::issue"`).
/// * `elapsed` - Time spent in the handler.
/// * `outcome` - Handler result; only the error label is logged.
///
/// Never pass plaintext codes or digests in `route`.
#[inline]
pub fn log_request<T>(route: &str, elapsed: Duration, outcome: &Result<T, ApiError>) {
    let duration_ms = elapsed.as_millis() as u64;

    match outcome {
        Ok(_) => info!(route, duration_ms, "request_success"),
        Err(err) => {
            let status = err.status().as_u16();
            warn!(route, duration_ms, status, error = err.error_code(), "request_failure")
        }
    }
}
