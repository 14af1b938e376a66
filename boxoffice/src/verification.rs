//! Ticket verification and check-in gate.
//!
//! `verify` is read only. `admit` is a conditional update on the ticket, so
//! of any number of concurrent admits exactly one returns
//! [`AdmitOutcome::Admitted`]. The caller's [`AgentContext`] is passed in
//! explicitly; scope violations are [`GateError::Forbidden`], never
//! "not found".

use crate::issuance;
use crate::metrics;
use crate::storage::{AssignmentRepository, StorageError, TicketRepository};
use crate::types::{AgentContext, AgentId, AgentRole, ListingRef, ScanCode, Ticket, TicketId};
use boxoffice_core::environment::Clock;
use std::sync::Arc;
use thiserror::Error;

/// Gate errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Caller may not verify this listing or ticket
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No ticket with that id
    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),

    /// Repository failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a scan lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Ticket exists and has not been used
    Valid(Ticket),
    /// Ticket was already used
    AlreadyAdmitted(Ticket),
    /// No ticket has this code
    NotFound,
}

/// Result of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// This call admitted the holder
    Admitted(Ticket),
    /// Someone admitted the holder earlier
    AlreadyAdmitted(Ticket),
}

impl AdmitOutcome {
    /// The ticket in its current state
    #[must_use]
    pub const fn ticket(&self) -> &Ticket {
        match self {
            Self::Admitted(t) | Self::AlreadyAdmitted(t) => t,
        }
    }
}

/// Result of a scan-station check-in (verify then admit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckIn {
    /// Admitted now
    Admitted(Ticket),
    /// Used before
    AlreadyAdmitted(Ticket),
    /// Unknown code
    NotFound,
}

/// Verification gate.
#[derive(Clone)]
pub struct VerificationGate {
    tickets: Arc<dyn TicketRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    clock: Arc<dyn Clock>,
}

impl VerificationGate {
    /// Create a gate
    #[must_use]
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        assignments: Arc<dyn AssignmentRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets,
            assignments,
            clock,
        }
    }

    /// Build the context for a caller from its stored assignments.
    ///
    /// # Errors
    ///
    /// [`GateError::Storage`] on repository failures.
    pub async fn context_for(&self, agent_id: AgentId, role: AgentRole) -> Result<AgentContext, GateError> {
        Ok(match role {
            AgentRole::Admin => AgentContext::admin(agent_id),
            AgentRole::Agent => AgentContext::agent(agent_id, self.assignments.listings_for(agent_id).await?),
        })
    }

    /// Look a scanned code up for `scope`.
    ///
    /// # Errors
    ///
    /// - [`GateError::Forbidden`] when the agent is not assigned to `scope`
    ///   or the ticket belongs to another listing
    /// - [`GateError::Storage`] on repository failures
    #[tracing::instrument(skip(self, code, agent), fields(code = %code, agent_id = %agent.agent_id))]
    pub async fn verify(
        &self,
        code: &ScanCode,
        scope: ListingRef,
        agent: &AgentContext,
    ) -> Result<Verification, GateError> {
        if !agent.may_verify(&scope) {
            metrics::record_admission("forbidden");
            tracing::warn!(%scope, "Agent not assigned to listing");
            return Err(GateError::Forbidden(format!("agent is not assigned to {scope}")));
        }

        if !issuance::is_well_formed_code(code) {
            metrics::record_admission("not_found");
            return Ok(Verification::NotFound);
        }

        let Some(ticket) = self.tickets.find_by_code(code).await? else {
            metrics::record_admission("not_found");
            return Ok(Verification::NotFound);
        };

        if ticket.listing != scope {
            metrics::record_admission("forbidden");
            tracing::warn!(ticket_id = %ticket.id, ticket_listing = %ticket.listing, %scope, "Ticket belongs to another listing");
            return Err(GateError::Forbidden("ticket belongs to another listing".to_string()));
        }

        Ok(if ticket.admission.is_admitted() {
            Verification::AlreadyAdmitted(ticket)
        } else {
            Verification::Valid(ticket)
        })
    }

    /// Admit the holder of `ticket_id`, at most once.
    ///
    /// # Errors
    ///
    /// - [`GateError::TicketNotFound`] for unknown ids
    /// - [`GateError::Forbidden`] when the ticket's listing is out of scope
    /// - [`GateError::Storage`] on repository failures
    #[tracing::instrument(skip(self, agent), fields(agent_id = %agent.agent_id))]
    pub async fn admit(&self, ticket_id: TicketId, agent: &AgentContext) -> Result<AdmitOutcome, GateError> {
        let ticket = self
            .tickets
            .find(ticket_id)
            .await?
            .ok_or(GateError::TicketNotFound(ticket_id))?;

        if !agent.may_verify(&ticket.listing) {
            metrics::record_admission("forbidden");
            return Err(GateError::Forbidden(format!(
                "agent is not assigned to {}",
                ticket.listing
            )));
        }

        let won = self
            .tickets
            .mark_admitted(ticket_id, agent.agent_id, self.clock.now())
            .await?;

        let current = self
            .tickets
            .find(ticket_id)
            .await?
            .ok_or(GateError::TicketNotFound(ticket_id))?;

        if won {
            metrics::record_admission("admitted");
            tracing::info!(%ticket_id, "Ticket admitted");
            Ok(AdmitOutcome::Admitted(current))
        } else {
            metrics::record_admission("already_admitted");
            tracing::info!(%ticket_id, "Ticket already admitted");
            Ok(AdmitOutcome::AlreadyAdmitted(current))
        }
    }

    /// Verify a scanned code and admit its holder.
    ///
    /// # Errors
    ///
    /// Same as [`VerificationGate::verify`] and [`VerificationGate::admit`].
    pub async fn check_in(
        &self,
        code: &ScanCode,
        scope: ListingRef,
        agent: &AgentContext,
    ) -> Result<CheckIn, GateError> {
        match self.verify(code, scope, agent).await? {
            Verification::NotFound => Ok(CheckIn::NotFound),
            Verification::AlreadyAdmitted(ticket) => {
                metrics::record_admission("already_admitted");
                Ok(CheckIn::AlreadyAdmitted(ticket))
            },
            Verification::Valid(ticket) => Ok(match self.admit(ticket.id, agent).await? {
                AdmitOutcome::Admitted(t) => CheckIn::Admitted(t),
                AdmitOutcome::AlreadyAdmitted(t) => CheckIn::AlreadyAdmitted(t),
            }),
        }
    }
}
