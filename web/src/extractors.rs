//! Custom Axum extractors.
//!
//! This module contains custom extractors for common HTTP patterns:
//! - `CorrelationId`: Read the request correlation ID
//! - `AgentIdentity`: Identify the check-in agent calling a verification endpoint
//!
//! # Examples
//!
//! ```ignore
//! use boxoffice_web::extractors::{AgentIdentity, CorrelationId};
//!
//! async fn admit(
//!     State(state): State<AppState>,
//!     correlation_id: CorrelationId,
//!     agent: AgentIdentity,
//!     Json(request): Json<AdmitRequest>,
//! ) -> Result<Json<AdmitResponse>, AppError> {
//!     tracing::info!(
//!         correlation_id = %correlation_id.0,
//!         agent_id = %agent.agent_id,
//!         "Admitting ticket"
//!     );
//!     // ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use uuid::Uuid;

/// Header carrying the calling agent's id.
pub const AGENT_ID_HEADER: &str = "X-Agent-Id";

/// Header carrying the calling agent's role (`agent` or `admin`).
pub const AGENT_ROLE_HEADER: &str = "X-Agent-Role";

/// Correlation ID for request tracing.
///
/// Uses the id stored by the correlation middleware, then the
/// `X-Correlation-ID` header, and finally generates a new UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        Ok(Self(
            header_uuid(&parts.headers, CORRELATION_ID_HEADER).unwrap_or_else(Uuid::new_v4),
        ))
    }
}

/// Role claimed by a verification caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRoleHeader {
    /// Scoped check-in agent
    Agent,
    /// Administrator (unscoped)
    Admin,
}

/// Identity of the agent calling a verification endpoint.
///
/// Read from `X-Agent-Id` (UUID) and the optional `X-Agent-Role` header,
/// which defaults to `agent`. Requests without a valid agent id are rejected
/// with 401. Neither header is authenticated here; both are expected from a
/// trusted upstream gateway.
#[derive(Debug, Clone, Copy)]
pub struct AgentIdentity {
    /// Agent id
    pub agent_id: Uuid,
    /// Claimed role
    pub role: AgentRoleHeader,
}

#[async_trait]
impl<S> FromRequestParts<S> for AgentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let agent_id = header_uuid(&parts.headers, AGENT_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("missing or invalid X-Agent-Id header"))?;

        let role = match parts
            .headers
            .get(AGENT_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("agent") => AgentRoleHeader::Agent,
            Some("admin") => AgentRoleHeader::Admin,
            Some(other) => {
                return Err(AppError::unauthorized(format!("unknown agent role: {other}")));
            },
        };

        Ok(Self { agent_id, role })
    }
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}
