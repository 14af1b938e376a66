//! HTTP error type for box office handlers.
//!
//! Domain errors (checkout, gate) are mapped to an [`AppError`] in the
//! application crate. The client sees a stable `code` and a message; the
//! underlying cause is only logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Error returned by web handlers.
///
/// ```ignore
/// async fn get_order(Path(id): Path<Uuid>) -> Result<Json<OrderView>, AppError> {
///     let view = checkout.order(OrderId::from_uuid(id)).await?
///         .ok_or_else(|| AppError::not_found("Order", id))?;
///     Ok(Json(view))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    /// Logged on 5xx, never serialized
    source: Option<anyhow::Error>,
}

impl AppError {
    fn of(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 401, missing or malformed caller identity.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::of(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// 403, caller identified but out of scope.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::of(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// 404 for `resource` with `id`.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::of(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{resource} {id} not found"))
    }

    /// 409, request contradicts stored state.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::of(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 422, well-formed request with invalid content.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::of(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    /// 500.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::of(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// 502, a payment provider failed.
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::of(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", message)
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Client-facing message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    error = %source,
                    "{}", self.message
                ),
                None => tracing::error!(status = %self.status, code = self.code, "{}", self.message),
            }
        } else {
            tracing::debug!(status = %self.status, code = self.code, "{}", self.message);
        }

        let body = Json(ErrorBody {
            code: self.code,
            message: &self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = AppError::not_found("Order", "7d0c");
        assert_eq!(err.to_string(), "[NOT_FOUND] Order 7d0c not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn provider_failure_keeps_cause_out_of_message() {
        let err = AppError::bad_gateway("payment provider unavailable")
            .with_source(anyhow::anyhow!("connection refused"));

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.message(), "payment provider unavailable");
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string).as_deref(),
            Some("connection refused")
        );
    }

    #[tokio::test]
    async fn response_body_has_code_and_message() {
        let response = AppError::validation("contact email is required").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_default();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["message"], "contact email is required");
    }
}
