//! Router configuration for the box office.

use super::health::{health_check, metrics, readiness_check};
use super::state::AppState;
use crate::api::{checkout, payments, promo, verification};
use axum::{
    routing::{get, post},
    Router,
};
use boxoffice_web::correlation_id_layer;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Health, readiness and metrics sit at the root; everything else is under
/// `/api`. Every request gets a correlation id and a trace span.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Checkout
        .route("/checkout", post(checkout::create_checkout))
        .route("/orders/:id", get(checkout::get_order))
        .route("/orders/:id/retry-payment", post(checkout::retry_payment))
        // Payments
        .route("/payments/status/:token", get(payments::payment_status))
        .route("/payments/verify", get(payments::verify_payment))
        .route("/payments/callback", post(payments::payment_callback))
        // Promo codes
        .route("/promo/validate", post(promo::validate_promo))
        // Check-in
        .route("/verification/verify", post(verification::verify_ticket))
        .route("/verification/admit", post(verification::admit_ticket))
        .route("/verification/check-in", post(verification::check_in_ticket));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
