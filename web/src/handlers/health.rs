//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT check dependencies (database, etc.).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Result of a single dependency probe.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComponentHealth {
    /// Component name (e.g. `database`)
    pub component: String,
    /// Whether the component answered
    pub healthy: bool,
    /// Failure detail, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    /// A component that answered.
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            healthy: true,
            message: None,
        }
    }

    /// A component that failed its probe.
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            healthy: false,
            message: Some(message.into()),
        }
    }
}

/// Readiness report body.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    /// `ready` or `not_ready`
    pub status: &'static str,
    /// Individual probes
    pub checks: Vec<ComponentHealth>,
}

/// Build the readiness response from dependency probes.
///
/// # Status Codes
///
/// - 200 OK: every component is healthy
/// - 503 Service Unavailable: at least one component failed
#[must_use]
pub fn readiness(checks: Vec<ComponentHealth>) -> (StatusCode, Json<ReadinessReport>) {
    let ready = checks.iter().all(|c| c.healthy);
    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (status, Json(ReadinessReport { status: label, checks }))
}
