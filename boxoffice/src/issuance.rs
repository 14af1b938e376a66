//! Ticket issuance.
//!
//! A paid order gets one ticket per purchased unit. Each unit is a slot
//! `(order, line index, unit index)`; the repository inserts a slot at most
//! once, so repeated or concurrent issuance never mints twice.

use crate::aggregates::Order;
use crate::metrics;
use crate::storage::{StorageError, TicketRepository};
use crate::types::{Admission, OrderStatus, ScanCode, Ticket, TicketId};
use boxoffice_core::environment::Clock;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Prefix of every scan code
pub const CODE_PREFIX: &str = "TKT-";

/// Symbols after the prefix
pub const CODE_LENGTH: usize = 16;

/// 32 symbols without `0/O` and `1/I` (5 bits each, 80 bits per code)
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MAX_CODE_ATTEMPTS: usize = 5;

/// Issuance errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IssuanceError {
    /// Tickets are only minted for paid orders
    #[error("order is {status}, tickets are issued only for paid orders")]
    NotPaid {
        /// Current status
        status: OrderStatus,
    },

    /// Freshly generated codes kept colliding
    #[error("could not allocate a unique ticket code")]
    CodeExhausted,

    /// Repository failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Generate a random scan code.
#[must_use]
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> ScanCode {
    let mut code = String::with_capacity(CODE_PREFIX.len() + CODE_LENGTH);
    code.push_str(CODE_PREFIX);
    for _ in 0..CODE_LENGTH {
        code.push(char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]));
    }
    ScanCode::new(code)
}

/// Whether `code` has the shape of an issued scan code
#[must_use]
pub fn is_well_formed_code(code: &ScanCode) -> bool {
    code.as_str()
        .strip_prefix(CODE_PREFIX)
        .is_some_and(|rest| rest.len() == CODE_LENGTH && rest.bytes().all(|b| CODE_ALPHABET.contains(&b)))
}

fn fresh_code() -> ScanCode {
    generate_code(&mut rand::thread_rng())
}

/// Mints tickets for paid orders.
#[derive(Clone)]
pub struct TicketIssuer {
    tickets: Arc<dyn TicketRepository>,
    clock: Arc<dyn Clock>,
}

impl TicketIssuer {
    /// Create an issuer
    #[must_use]
    pub fn new(tickets: Arc<dyn TicketRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { tickets, clock }
    }

    /// Issue the tickets of a paid order.
    ///
    /// Slots that already hold a ticket are left alone, so calling this again
    /// returns the same set.
    ///
    /// # Errors
    ///
    /// - [`IssuanceError::NotPaid`] for a pending or failed order
    /// - [`IssuanceError::CodeExhausted`] if a slot could not get a unique code
    /// - [`IssuanceError::Storage`] on repository failures
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn issue_tickets(&self, order: &Order) -> Result<Vec<Ticket>, IssuanceError> {
        if order.status != OrderStatus::Paid {
            return Err(IssuanceError::NotPaid {
                status: order.status,
            });
        }

        let mut filled: HashSet<(u32, u32)> = self
            .tickets
            .for_order(order.id)
            .await?
            .iter()
            .map(|t| (t.line_index, t.unit_index))
            .collect();

        let mut minted = 0_u64;
        for (line_index, item) in (0_u32..).zip(&order.items) {
            for unit_index in 0..item.quantity {
                if filled.contains(&(line_index, unit_index)) {
                    continue;
                }

                let mut attempts = 0;
                loop {
                    attempts += 1;
                    let ticket = Ticket {
                        id: TicketId::new(),
                        order_id: order.id,
                        listing: item.listing,
                        holder_name: order.contact.name.clone(),
                        holder_email: order.contact.email.clone(),
                        tier_label: item.variant_label.clone().unwrap_or_else(|| item.name.clone()),
                        unit_price: item.unit_price,
                        code: fresh_code(),
                        line_index,
                        unit_index,
                        admission: Admission::NotAdmitted,
                        issued_at: self.clock.now(),
                    };

                    if self.tickets.insert_if_absent(&ticket).await? {
                        minted += 1;
                        break;
                    }

                    // Either a concurrent issuer filled the slot or the code collided
                    filled = self
                        .tickets
                        .for_order(order.id)
                        .await?
                        .iter()
                        .map(|t| (t.line_index, t.unit_index))
                        .collect();
                    if filled.contains(&(line_index, unit_index)) {
                        break;
                    }
                    if attempts >= MAX_CODE_ATTEMPTS {
                        tracing::error!(line_index, unit_index, "Ticket code allocation exhausted");
                        return Err(IssuanceError::CodeExhausted);
                    }
                    tracing::warn!(line_index, unit_index, "Ticket code collision, retrying");
                }
            }
        }

        metrics::record_tickets_issued(minted);
        if minted > 0 {
            tracing::info!(minted, "Tickets issued");
        }

        Ok(self.tickets.for_order(order.id).await?)
    }
}
