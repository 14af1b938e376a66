//! Correlation middleware.
//!
//! Every request gets a [`CorrelationId`]: the caller's `X-Correlation-ID`
//! when it is a valid UUID, a fresh v4 otherwise. The id is stored in the
//! request extensions, attached to an `http_request` span (together with the
//! scan-station agent when `X-Agent-Id` is present) and echoed back on the
//! response.
//!
//! Payment callbacks and check-in scans are logged under that span, so a
//! provider retry or a double scan can be matched to the original call.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/payments/callback", post(payment_callback))
//!     .layer(correlation_id_layer());
//! ```

use crate::extractors::{CorrelationId, AGENT_ID_HEADER};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    response::Response,
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Layer installing [`CorrelationIdMiddleware`].
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Service wrapper produced by [`CorrelationIdLayer`].
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

/// Correlation id carried by the request headers, if it parses.
fn incoming_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(CORRELATION_ID_HEADER)?
        .to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let id = incoming_id(req.headers()).unwrap_or_else(Uuid::new_v4);
        req.extensions_mut().insert(CorrelationId(id));

        let agent = req
            .headers()
            .get(AGENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let span = tracing::info_span!(
            "http_request",
            correlation_id = %id,
            method = %req.method(),
            path = %req.uri().path(),
            agent_id = tracing::field::Empty,
        );
        if let Some(agent) = agent {
            span.record("agent_id", agent.as_str());
        }

        let response = self.inner.call(req);
        Box::pin(
            async move {
                let mut response = response.await?;
                if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                    response.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::post, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/api/payments/callback",
                post(|id: CorrelationId| async move { id.0.to_string() }),
            )
            .layer(correlation_id_layer())
    }

    async fn call(header: Option<&str>) -> (String, String) {
        let mut request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/payments/callback");
        if let Some(value) = header {
            request = request.header(CORRELATION_ID_HEADER, value);
        }

        let response = app().oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
        let echoed = response.headers()[CORRELATION_ID_HEADER].to_str().unwrap().to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (echoed, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn provider_supplied_id_is_kept() {
        let id = Uuid::new_v4();

        let (echoed, seen_by_handler) = call(Some(&id.to_string())).await;

        assert_eq!(echoed, id.to_string());
        assert_eq!(seen_by_handler, id.to_string());
    }

    #[tokio::test]
    async fn missing_or_malformed_id_is_replaced() {
        for header in [None, Some("retry-7")] {
            let (echoed, seen_by_handler) = call(header).await;

            assert!(Uuid::parse_str(&echoed).is_ok());
            assert_eq!(echoed, seen_by_handler);
        }
    }
}
