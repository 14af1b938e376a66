//! Payment status, verification and provider callback endpoints.
//!
//! - GET /api/payments/status/:token - Stored status, read only
//! - GET /api/payments/verify?reference=... - Ask the provider and reconcile
//! - POST /api/payments/callback - Provider notification

use crate::aggregates::Transition;
use crate::checkout::{PaymentResult, PaymentStatus, PaymentStatusView};
use crate::server::state::AppState;
use crate::types::{CorrelationToken, OrderId, OrderStatus};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use boxoffice_web::{AppError, CorrelationId};
use serde::{Deserialize, Serialize};

/// Current status for a correlation token.
///
/// Unknown tokens answer `{"status": "unknown"}` rather than 404 so pollers
/// can keep a single code path.
///
/// # Errors
///
/// 500 on storage failures.
pub async fn payment_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<PaymentStatusView>, AppError> {
    Ok(Json(state.checkout.status(&CorrelationToken::new(token)).await?))
}

/// Query parameters for provider verification.
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    /// Correlation token / provider reference
    pub reference: String,
}

/// Result of a provider verification.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Whether the order is paid
    pub success: bool,
    /// Status after reconciliation
    pub status: PaymentStatus,
    /// Order the reference belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
}

/// Ask the provider about a reference and reconcile the order.
///
/// This is where hosted checkout sends the buyer back to.
///
/// # Errors
///
/// - 502 when the provider query fails
/// - 409 when the provider reports a different amount
pub async fn verify_payment(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>, AppError> {
    let view = state.checkout.verify(&CorrelationToken::new(query.reference)).await?;

    Ok(Json(VerifyResponse {
        success: view.status == PaymentStatus::Paid,
        status: view.status,
        order_id: view.order_id,
    }))
}

/// Provider notification body.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackRequest {
    /// Correlation token the provider returned at initiation
    pub token: CorrelationToken,
    /// What happened
    pub result: PaymentResult,
}

/// Acknowledgement sent back to the provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackResponse {
    /// Always `true`; failures are error responses
    pub success: bool,
    /// Order the token belongs to
    pub order_id: OrderId,
    /// Order status after the notification
    pub status: OrderStatus,
    /// Whether this notification changed the order
    pub transition: Transition,
    /// Tickets on the order
    pub tickets_issued: usize,
}

/// Apply a provider notification.
///
/// Replays of the same result are acknowledged with `"transition": "unchanged"`.
///
/// # Errors
///
/// - 404 when no order holds the token
/// - 409 for amount mismatches or a result contradicting the stored outcome
pub async fn payment_callback(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Json(request): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>, AppError> {
    tracing::info!(correlation_id = %correlation_id.0, token = %request.token, "Payment callback received");

    let outcome = state
        .checkout
        .apply_notification(&request.token, request.result)
        .await?;

    Ok(Json(CallbackResponse {
        success: true,
        order_id: outcome.order.id,
        status: outcome.order.status,
        transition: outcome.transition,
        tickets_issued: outcome.tickets.len(),
    }))
}
