//! Health, readiness and metrics endpoints.

use super::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use boxoffice_web::handlers::health::{readiness, ComponentHealth, ReadinessReport};

pub use boxoffice_web::handlers::health::health_check;

/// Readiness check endpoint.
///
/// Returns 200 when the order store answers, 503 otherwise. Used by load
/// balancers to decide whether to route traffic here.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/ready
/// # {"status":"ready","checks":[{"component":"database","healthy":true}]}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    let database = match state.checkout.repositories().orders.ping().await {
        Ok(()) => ComponentHealth::healthy("database"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            ComponentHealth::unhealthy("database", "storage unavailable")
        },
    };

    readiness(vec![database])
}

/// Prometheus scrape endpoint.
///
/// Answers 404 when no recorder is installed (e.g. in tests).
pub async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics.as_ref().and_then(|m| m.render()) {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}
