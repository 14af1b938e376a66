//! Check-in endpoints for scan stations.
//!
//! - POST /api/verification/verify - Look a scanned code up (read only)
//! - POST /api/verification/admit - Admit a ticket by id
//! - POST /api/verification/check-in - Verify then admit
//!
//! The caller is identified by `X-Agent-Id` (and `X-Agent-Role: admin` for
//! administrators). An agent may only work listings it is assigned to.
//!
//! Both headers are taken as given. They must be set by a trusted upstream
//! gateway that authenticates the scan station and strips any values the
//! client sent; exposed directly, any caller could claim the admin role and
//! skip the assignment check.

use crate::server::state::AppState;
use crate::types::{AgentContext, AgentId, AgentRole, ListingRef, ScanCode, Ticket, TicketId};
use crate::verification::{AdmitOutcome, CheckIn, Verification};
use axum::{extract::State, http::StatusCode, Json};
use boxoffice_web::{AgentIdentity, AgentRoleHeader, AppError, CorrelationId};
use serde::{Deserialize, Serialize};

/// Scanned code and the listing the station is working.
#[derive(Debug, Deserialize, Serialize)]
pub struct ScanRequest {
    /// Code as scanned or typed
    pub code: String,
    /// Event or tour being checked in
    pub listing: ListingRef,
}

/// Ticket to admit.
#[derive(Debug, Deserialize, Serialize)]
pub struct AdmitRequest {
    /// Ticket id from a previous verify
    pub ticket_id: TicketId,
}

/// Result label of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanResult {
    /// Ticket may enter
    Valid,
    /// Admitted by this request
    Admitted,
    /// Used before
    AlreadyAdmitted,
    /// No such code
    NotFound,
}

/// Answer to a scan.
#[derive(Debug, Deserialize, Serialize)]
pub struct ScanResponse {
    /// What happened
    pub result: ScanResult,
    /// Ticket, when one matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<Ticket>,
}

impl ScanResponse {
    fn new(result: ScanResult, ticket: Option<Ticket>) -> Json<Self> {
        Json(Self { result, ticket })
    }
}

/// Agent context from the identity headers. The role header is trusted as is.
async fn context(state: &AppState, identity: AgentIdentity) -> Result<AgentContext, AppError> {
    let role = match identity.role {
        AgentRoleHeader::Agent => AgentRole::Agent,
        AgentRoleHeader::Admin => AgentRole::Admin,
    };
    Ok(state
        .gate
        .context_for(AgentId::from_uuid(identity.agent_id), role)
        .await?)
}

/// Look a scanned code up without changing anything.
///
/// # Errors
///
/// - 401 without a valid `X-Agent-Id`
/// - 403 when the agent is not assigned to the listing or the ticket is for
///   another listing
pub async fn verify_ticket(
    State(state): State<AppState>,
    identity: AgentIdentity,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, AppError> {
    let agent = context(&state, identity).await?;
    let code = ScanCode::from_scan(&request.code);

    Ok(match state.gate.verify(&code, request.listing, &agent).await? {
        Verification::Valid(ticket) => ScanResponse::new(ScanResult::Valid, Some(ticket)),
        Verification::AlreadyAdmitted(ticket) => ScanResponse::new(ScanResult::AlreadyAdmitted, Some(ticket)),
        Verification::NotFound => ScanResponse::new(ScanResult::NotFound, None),
    })
}

/// Admit a ticket. Answers 409 with the ticket when it was already used.
///
/// # Errors
///
/// - 401 without a valid `X-Agent-Id`
/// - 403 when the ticket's listing is out of scope
/// - 404 for unknown ticket ids
pub async fn admit_ticket(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    identity: AgentIdentity,
    Json(request): Json<AdmitRequest>,
) -> Result<(StatusCode, Json<ScanResponse>), AppError> {
    tracing::info!(
        correlation_id = %correlation_id.0,
        agent_id = %identity.agent_id,
        ticket_id = %request.ticket_id,
        "Admitting ticket"
    );
    let agent = context(&state, identity).await?;

    Ok(match state.gate.admit(request.ticket_id, &agent).await? {
        AdmitOutcome::Admitted(ticket) => (StatusCode::OK, ScanResponse::new(ScanResult::Admitted, Some(ticket))),
        AdmitOutcome::AlreadyAdmitted(ticket) => (
            StatusCode::CONFLICT,
            ScanResponse::new(ScanResult::AlreadyAdmitted, Some(ticket)),
        ),
    })
}

/// Verify a scanned code and admit its holder in one call.
///
/// # Errors
///
/// - 401 without a valid `X-Agent-Id`
/// - 403 when the listing or ticket is out of scope
pub async fn check_in_ticket(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    identity: AgentIdentity,
    Json(request): Json<ScanRequest>,
) -> Result<(StatusCode, Json<ScanResponse>), AppError> {
    tracing::info!(
        correlation_id = %correlation_id.0,
        agent_id = %identity.agent_id,
        listing = %request.listing,
        "Check-in scan"
    );
    let agent = context(&state, identity).await?;
    let code = ScanCode::from_scan(&request.code);

    Ok(match state.gate.check_in(&code, request.listing, &agent).await? {
        CheckIn::Admitted(ticket) => (StatusCode::OK, ScanResponse::new(ScanResult::Admitted, Some(ticket))),
        CheckIn::AlreadyAdmitted(ticket) => (
            StatusCode::CONFLICT,
            ScanResponse::new(ScanResult::AlreadyAdmitted, Some(ticket)),
        ),
        CheckIn::NotFound => (StatusCode::NOT_FOUND, ScanResponse::new(ScanResult::NotFound, None)),
    })
}
