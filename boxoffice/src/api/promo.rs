//! Promo code validation endpoint.
//!
//! - POST /api/promo/validate - Check a code and quote its discount

use crate::checkout::CheckoutError;
use crate::server::state::AppState;
use crate::types::Money;
use axum::{extract::State, Json};
use boxoffice_web::AppError;
use serde::{Deserialize, Serialize};

/// Code to validate.
#[derive(Debug, Deserialize, Serialize)]
pub struct ValidatePromoRequest {
    /// Code as typed, any case
    pub code: String,
    /// Subtotal plus add-ons the discount applies to
    pub base: Money,
}

/// Validation answer.
#[derive(Debug, Deserialize, Serialize)]
pub struct ValidatePromoResponse {
    /// Whether the code can be applied
    pub valid: bool,
    /// Discount on `base`
    pub discount: Money,
    /// Normalised code, when valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Why the code was refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Validate a promo code.
///
/// Unknown and unusable codes get the same `"invalid promo code"` answer.
///
/// # Errors
///
/// 500 on storage failures.
pub async fn validate_promo(
    State(state): State<AppState>,
    Json(request): Json<ValidatePromoRequest>,
) -> Result<Json<ValidatePromoResponse>, AppError> {
    match state.checkout.validate_promo(&request.code, request.base).await {
        Ok(applied) => Ok(Json(ValidatePromoResponse {
            valid: true,
            discount: applied.amount,
            code: Some(applied.code),
            message: None,
        })),
        Err(CheckoutError::Promo(rejection)) => Ok(Json(ValidatePromoResponse {
            valid: false,
            discount: Money::ZERO,
            code: None,
            message: Some(rejection.to_string()),
        })),
        Err(other) => Err(other.into()),
    }
}
