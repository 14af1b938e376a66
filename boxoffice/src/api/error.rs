//! Domain errors as HTTP errors.

use crate::aggregates::OrderError;
use crate::checkout::CheckoutError;
use crate::verification::GateError;
use boxoffice_web::AppError;

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Validation(e) => Self::validation(e.to_string()),
            CheckoutError::Promo(e) => Self::validation(e.to_string()),
            CheckoutError::Order(OrderError::AmountMismatch { .. } | OrderError::AlreadyFinalized { .. }) => {
                Self::conflict(err.to_string())
            },
            CheckoutError::Order(e) => Self::validation(e.to_string()),
            CheckoutError::Gateway { order_id, source } => {
                Self::bad_gateway(format!("payment provider unavailable, order {order_id} is still pending"))
                    .with_source(anyhow::Error::new(source))
            },
            CheckoutError::NotFound(id) => Self::not_found("Order", id),
            CheckoutError::UnknownToken(token) => Self::not_found("Payment", token),
            CheckoutError::NotPending { .. } => Self::conflict(err.to_string()),
            CheckoutError::Storage(e) => Self::internal("An internal error occurred").with_source(anyhow::Error::new(e)),
            CheckoutError::Issuance(e) => {
                Self::internal("Tickets could not be issued").with_source(anyhow::Error::new(e))
            },
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Forbidden(message) => Self::forbidden(message),
            GateError::TicketNotFound(id) => Self::not_found("Ticket", id),
            GateError::Storage(e) => Self::internal("An internal error occurred").with_source(anyhow::Error::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_gateway::GatewayError;
    use crate::promo::PromoRejection;
    use crate::storage::StorageError;
    use crate::types::{OrderId, OrderStatus, TicketId};
    use crate::validation::ValidationError;
    use axum::http::StatusCode;

    #[test]
    fn checkout_errors_map_to_statuses() {
        let cases = [
            (CheckoutError::Validation(ValidationError::NoLineItems), StatusCode::UNPROCESSABLE_ENTITY),
            (CheckoutError::Promo(PromoRejection::Inactive), StatusCode::UNPROCESSABLE_ENTITY),
            (
                CheckoutError::Gateway {
                    order_id: OrderId::new(),
                    source: GatewayError::Network("connection refused".to_string()),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (CheckoutError::NotFound(OrderId::new()), StatusCode::NOT_FOUND),
            (
                CheckoutError::NotPending {
                    order_id: OrderId::new(),
                    status: OrderStatus::Paid,
                },
                StatusCode::CONFLICT,
            ),
            (
                CheckoutError::Storage(StorageError::Database("pool timed out".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn promo_rejections_share_one_message() {
        let not_found = AppError::from(CheckoutError::Promo(PromoRejection::NotFound));
        let inactive = AppError::from(CheckoutError::Promo(PromoRejection::Inactive));
        assert_eq!(not_found.message(), "invalid promo code");
        assert_eq!(not_found.message(), inactive.message());
    }

    #[test]
    fn storage_details_stay_out_of_the_message() {
        let err = AppError::from(GateError::Storage(StorageError::Database("password authentication failed".to_string())));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message().contains("password"));
    }

    #[test]
    fn gate_errors_map_to_statuses() {
        assert_eq!(AppError::from(GateError::Forbidden("nope".to_string())).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::from(GateError::TicketNotFound(TicketId::new())).status(), StatusCode::NOT_FOUND);
    }
}
