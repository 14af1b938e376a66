//! Axum integration for the box office HTTP API.
//!
//! Handlers stay thin: they parse the request, call a domain service and map
//! the result (or the domain error) to an HTTP response.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at Axum handler
//! 2. **Extract data** from request (JSON, path, agent headers)
//! 3. **Call** the checkout service or verification gate
//! 4. **Map result** to HTTP response, or to [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_web::{AppError, correlation_id_layer};
//! use axum::{Router, routing::post, Json};
//!
//! async fn validate_promo(
//!     State(state): State<AppState>,
//!     Json(request): Json<PromoRequest>,
//! ) -> Result<Json<PromoResponse>, AppError> {
//!     let quote = state.promos.quote(&request.code, request.subtotal).await?;
//!     Ok(Json(quote.into()))
//! }
//!
//! let app = Router::new()
//!     .route("/api/promo/validate", post(validate_promo))
//!     .layer(correlation_id_layer())
//!     .with_state(app_state);
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{AgentIdentity, AgentRoleHeader, CorrelationId};
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};
