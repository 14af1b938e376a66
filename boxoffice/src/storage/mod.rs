//! Persistence collaborators.
//!
//! Every shared-state mutation is a conditional update:
//!
//! - orders are finalized only while still pending
//! - ticket slots `(order, line, unit)` and scan codes are insert-if-absent
//! - tickets are admitted only while not yet admitted
//! - a promo redemption is recorded once per order, and counted against the
//!   code only while the code is under its cap
//!
//! [`InMemoryRepository`] performs each one inside a single lock critical
//! section; [`PostgresRepository`] uses `UPDATE … WHERE` and
//! `INSERT … ON CONFLICT DO NOTHING`.

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

use crate::aggregates::Order;
use crate::types::{
    AgentAssignment, AgentId, CorrelationToken, ListingRef, OrderId, PromoCode, PromoRedemption,
    RedemptionOutcome, ScanCode, Ticket, TicketId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend unavailable or query failed
    #[error("database error: {0}")]
    Database(String),

    /// Write violates a uniqueness rule
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored row cannot be turned back into a domain value
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Order persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Store a new order
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if the id exists.
    async fn insert(&self, order: &Order) -> StorageResult<()>;

    /// Load an order with its tokens
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find(&self, id: OrderId) -> StorageResult<Option<Order>>;

    /// Load the order a correlation token belongs to
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find_by_token(&self, token: &CorrelationToken) -> StorageResult<Option<Order>>;

    /// Attach a token to a pending order.
    ///
    /// Returns `false` when the order is missing or no longer pending.
    /// Re-attaching a token the order already holds returns `true`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if the token belongs to another order.
    async fn attach_token(&self, id: OrderId, token: &CorrelationToken) -> StorageResult<bool>;

    /// Persist the terminal state of `order` if the stored order is still
    /// pending.
    ///
    /// Returns `true` for the caller that won the transition.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn finalize(&self, order: &Order) -> StorageResult<bool>;

    /// Cheap liveness probe for readiness checks
    ///
    /// # Errors
    ///
    /// When the backend is unreachable.
    async fn ping(&self) -> StorageResult<()>;
}

/// Ticket persistence.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Insert unless the ticket's slot or scan code is taken.
    ///
    /// Returns `true` if inserted.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn insert_if_absent(&self, ticket: &Ticket) -> StorageResult<bool>;

    /// Tickets of an order, ordered by line then unit
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn for_order(&self, order_id: OrderId) -> StorageResult<Vec<Ticket>>;

    /// Look a ticket up by scan code
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find_by_code(&self, code: &ScanCode) -> StorageResult<Option<Ticket>>;

    /// Look a ticket up by id
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find(&self, id: TicketId) -> StorageResult<Option<Ticket>>;

    /// Set the ticket admitted if it is not yet admitted.
    ///
    /// Returns `true` for the caller that won the admission.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn mark_admitted(&self, id: TicketId, by: AgentId, at: DateTime<Utc>) -> StorageResult<bool>;
}

/// Promo code persistence.
#[async_trait]
pub trait PromoRepository: Send + Sync {
    /// Look up a normalised code
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find_by_code(&self, code: &str) -> StorageResult<Option<PromoCode>>;

    /// Create or replace a code
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn upsert(&self, promo: &PromoCode) -> StorageResult<()>;

    /// Record a paid order's redemption and, in the same write, count it
    /// against the code if the code is under its cap.
    ///
    /// Keyed by order: recording an order that already has a redemption
    /// changes nothing and returns [`RedemptionOutcome::AlreadyRecorded`].
    ///
    /// # Errors
    ///
    /// Backend failures. Nothing is recorded when an error is returned.
    async fn redeem(&self, redemption: &PromoRedemption) -> StorageResult<RedemptionOutcome>;

    /// Redemption recorded for an order
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn redemption_for(&self, order_id: OrderId) -> StorageResult<Option<PromoRedemption>>;
}

/// Agent-to-listing assignments.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Listings an agent may verify
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn listings_for(&self, agent_id: AgentId) -> StorageResult<Vec<ListingRef>>;

    /// Assign an agent to a listing (idempotent)
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn assign(&self, assignment: AgentAssignment) -> StorageResult<()>;
}

/// The four repositories, shared by the services.
#[derive(Clone)]
pub struct Repositories {
    /// Orders
    pub orders: Arc<dyn OrderRepository>,
    /// Tickets
    pub tickets: Arc<dyn TicketRepository>,
    /// Promo codes
    pub promos: Arc<dyn PromoRepository>,
    /// Agent assignments
    pub assignments: Arc<dyn AssignmentRepository>,
}

impl Repositories {
    /// All four backed by one in-memory store
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryRepository::new()))
    }

    /// All four backed by one PostgreSQL pool
    #[must_use]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::from_backend(Arc::new(PostgresRepository::new(pool)))
    }

    /// All four backed by one value implementing every repository trait
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: OrderRepository + TicketRepository + PromoRepository + AssignmentRepository + 'static,
    {
        Self {
            orders: Arc::clone(&backend) as Arc<dyn OrderRepository>,
            tickets: Arc::clone(&backend) as Arc<dyn TicketRepository>,
            promos: Arc::clone(&backend) as Arc<dyn PromoRepository>,
            assignments: backend,
        }
    }
}
