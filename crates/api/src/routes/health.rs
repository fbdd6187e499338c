use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use perkgate_domain::HealthReport;
use tracing::debug;

use crate::context::AppContext;

/// `GET /health`
///
/// Always 200; the body is `{"mode":"normal"}` or `{"mode":"degraded"}`.
/// Breaker detail goes to the log, not the wire.
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthReport> {
    let report = ctx.service.health();
    for backend in &report.backends {
        debug!(
            backend = %backend.backend,
            adapter = %backend.adapter,
            breaker = %backend.breaker_state,
            failures = backend.consecutive_failures,
            "Backend health"
        );
    }
    Json(report)
}
