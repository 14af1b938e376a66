//! In-memory repositories for development and tests.

use super::{
    AssignmentRepository, OrderRepository, PromoRepository, StorageError, StorageResult,
    TicketRepository,
};
use crate::aggregates::Order;
use crate::types::{
    Admission, AgentAssignment, AgentId, CorrelationToken, ListingRef, OrderId, OrderStatus,
    PromoCode, PromoRedemption, RedemptionOutcome, ScanCode, Ticket, TicketId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    tokens: HashMap<CorrelationToken, OrderId>,
    tickets: HashMap<TicketId, Ticket>,
    codes: HashMap<ScanCode, TicketId>,
    slots: HashMap<(OrderId, u32, u32), TicketId>,
    promos: HashMap<String, PromoCode>,
    redemptions: HashMap<OrderId, PromoRedemption>,
    assignments: HashMap<AgentId, Vec<ListingRef>>,
}

/// Every repository trait over one mutex-guarded state.
///
/// Each conditional update runs inside a single critical section, which
/// gives the same at-most-once guarantees as the PostgreSQL backend.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderRepository for InMemoryRepository {
    async fn insert(&self, order: &Order) -> StorageResult<()> {
        let mut state = self.lock();
        if state.orders.contains_key(&order.id) {
            return Err(StorageError::Conflict(format!("order {} already exists", order.id)));
        }
        for token in &order.tokens {
            if state.tokens.contains_key(token) {
                return Err(StorageError::Conflict(format!("token {token} already in use")));
            }
        }
        for token in &order.tokens {
            state.tokens.insert(token.clone(), order.id);
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find(&self, id: OrderId) -> StorageResult<Option<Order>> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &CorrelationToken) -> StorageResult<Option<Order>> {
        let state = self.lock();
        Ok(state
            .tokens
            .get(token)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn attach_token(&self, id: OrderId, token: &CorrelationToken) -> StorageResult<bool> {
        let mut state = self.lock();
        match state.tokens.get(token) {
            Some(owner) if *owner == id => return Ok(true),
            Some(owner) => {
                return Err(StorageError::Conflict(format!(
                    "token {token} belongs to order {owner}"
                )));
            },
            None => {},
        }

        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        if order.attach_token(token.clone()).is_err() {
            return Ok(false);
        }
        state.tokens.insert(token.clone(), id);
        Ok(true)
    }

    async fn finalize(&self, order: &Order) -> StorageResult<bool> {
        let mut state = self.lock();
        let Some(stored) = state.orders.get_mut(&order.id) else {
            return Ok(false);
        };
        if stored.status != OrderStatus::Pending {
            return Ok(false);
        }
        stored.status = order.status;
        stored.evidence.clone_from(&order.evidence);
        stored.failure_reason.clone_from(&order.failure_reason);
        stored.finalized_at = order.finalized_at;
        Ok(true)
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl TicketRepository for InMemoryRepository {
    async fn insert_if_absent(&self, ticket: &Ticket) -> StorageResult<bool> {
        let mut state = self.lock();
        let slot = (ticket.order_id, ticket.line_index, ticket.unit_index);
        if state.slots.contains_key(&slot)
            || state.codes.contains_key(&ticket.code)
            || state.tickets.contains_key(&ticket.id)
        {
            return Ok(false);
        }
        state.slots.insert(slot, ticket.id);
        state.codes.insert(ticket.code.clone(), ticket.id);
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(true)
    }

    async fn for_order(&self, order_id: OrderId) -> StorageResult<Vec<Ticket>> {
        let state = self.lock();
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| (t.line_index, t.unit_index));
        Ok(tickets)
    }

    async fn find_by_code(&self, code: &ScanCode) -> StorageResult<Option<Ticket>> {
        let state = self.lock();
        Ok(state
            .codes
            .get(code)
            .and_then(|id| state.tickets.get(id))
            .cloned())
    }

    async fn find(&self, id: TicketId) -> StorageResult<Option<Ticket>> {
        Ok(self.lock().tickets.get(&id).cloned())
    }

    async fn mark_admitted(&self, id: TicketId, by: AgentId, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut state = self.lock();
        match state.tickets.get_mut(&id) {
            Some(ticket) if !ticket.admission.is_admitted() => {
                ticket.admission = Admission::Admitted { at, by };
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PromoRepository for InMemoryRepository {
    async fn find_by_code(&self, code: &str) -> StorageResult<Option<PromoCode>> {
        Ok(self.lock().promos.get(code).cloned())
    }

    async fn upsert(&self, promo: &PromoCode) -> StorageResult<()> {
        self.lock().promos.insert(promo.code.clone(), promo.clone());
        Ok(())
    }

    async fn redeem(&self, redemption: &PromoRedemption) -> StorageResult<RedemptionOutcome> {
        let mut state = self.lock();
        if state.redemptions.contains_key(&redemption.order_id) {
            return Ok(RedemptionOutcome::AlreadyRecorded);
        }

        let counted = match state.promos.get_mut(&redemption.code) {
            Some(promo) if promo.max_uses.is_none_or(|max| promo.times_used < max) => {
                promo.times_used = promo.times_used.saturating_add(1);
                true
            },
            _ => false,
        };
        state.redemptions.insert(redemption.order_id, redemption.clone());

        Ok(if counted {
            RedemptionOutcome::Counted
        } else {
            RedemptionOutcome::OverCap
        })
    }

    async fn redemption_for(&self, order_id: OrderId) -> StorageResult<Option<PromoRedemption>> {
        Ok(self.lock().redemptions.get(&order_id).cloned())
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryRepository {
    async fn listings_for(&self, agent_id: AgentId) -> StorageResult<Vec<ListingRef>> {
        Ok(self
            .lock()
            .assignments
            .get(&agent_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn assign(&self, assignment: AgentAssignment) -> StorageResult<()> {
        let mut state = self.lock();
        let listings = state.assignments.entry(assignment.agent_id).or_default();
        if !listings.contains(&assignment.listing) {
            listings.push(assignment.listing);
        }
        Ok(())
    }
}
