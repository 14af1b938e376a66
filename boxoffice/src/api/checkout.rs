//! Checkout API endpoints.
//!
//! - POST /api/checkout - Create a pending order and start its payment
//! - POST /api/orders/:id/retry-payment - Start a new payment attempt
//! - GET /api/orders/:id - Order with its tickets
//!
//! # Checkout Flow
//!
//! 1. **Create**: Order is validated, priced and stored as pending
//! 2. **Initiate**: The rail's gateway returns a correlation token
//! 3. **Settle**: The provider callback (or a poll) flips the order
//! 4. **Issue**: Tickets are minted once the order is paid

use crate::checkout::{CheckoutReceipt, CheckoutRequest, OrderView};
use crate::server::state::AppState;
use crate::types::{CorrelationToken, OrderId, OrderTotals};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use boxoffice_web::{AppError, CorrelationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response after starting a payment.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    /// Always `true`; failures are error responses
    pub success: bool,
    /// Pending order
    pub order_id: OrderId,
    /// Token to poll `/api/payments/status/:token` with
    pub correlation_token: CorrelationToken,
    /// Mobile-money checkout-request id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    /// Hosted checkout page to send the buyer to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Totals charged
    pub totals: OrderTotals,
}

impl From<CheckoutReceipt> for CheckoutResponse {
    fn from(receipt: CheckoutReceipt) -> Self {
        Self {
            success: true,
            order_id: receipt.order_id,
            correlation_token: receipt.correlation_token,
            checkout_request_id: receipt.checkout_request_id,
            redirect_url: receipt.redirect_url,
            totals: receipt.totals,
        }
    }
}

/// Create an order and start its payment.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/checkout \
///   -H "Content-Type: application/json" \
///   -d '{
///     "contact": {"name": "Wanjiru", "phone": "0712345678"},
///     "rail": "mobile_money",
///     "items": [{
///       "listing": {"kind": "event", "id": "550e8400-e29b-41d4-a716-446655440000"},
///       "name": "Nairobi Jazz Night",
///       "unit_price": 5000,
///       "quantity": 1
///     }],
///     "add_ons": [{"name": "Parking", "amount": 500}],
///     "promo_code": "save10"
///   }'
/// ```
///
/// Response (201):
/// ```json
/// {
///   "success": true,
///   "order_id": "...",
///   "correlation_token": "ws_CO_...",
///   "checkout_request_id": "ws_CO_...",
///   "totals": {"subtotal": 5000, "add_ons": 500, "discount": 550, "total": 4950}
/// }
/// ```
///
/// # Errors
///
/// - 422 for invalid input or promo codes (nothing is stored)
/// - 502 when the provider fails (the order stays pending)
pub async fn create_checkout(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    tracing::info!(correlation_id = %correlation_id.0, rail = %request.rail, "Checkout requested");

    let receipt = state.checkout.submit(request).await?;
    state.spawn_reconciliation(receipt.correlation_token.clone());

    Ok((StatusCode::CREATED, Json(receipt.into())))
}

/// Start a new payment attempt for a pending order.
///
/// # Errors
///
/// - 404 for unknown orders
/// - 409 when the order is no longer pending
/// - 502 when the provider fails
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let receipt = state.checkout.retry_payment(OrderId::from_uuid(order_id)).await?;
    state.spawn_reconciliation(receipt.correlation_token.clone());

    Ok(Json(receipt.into()))
}

/// Order status, totals and (once paid) tickets.
///
/// # Errors
///
/// 404 for unknown orders.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    Ok(Json(state.checkout.order(OrderId::from_uuid(order_id)).await?))
}
