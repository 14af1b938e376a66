//! Box office - payment reconciliation and ticket check-in for an event and
//! tour marketplace.
//!
//! Two flows carry all the logic:
//!
//! ```text
//! Checkout:
//! promo → order (pending) → gateway initiation → callback / poll → paid → tickets
//!
//! Check-in:
//! scan → verify (read only) → admit (at most once)
//! ```
//!
//! # Key Features
//!
//! ## 1. Conditional updates
//!
//! Orders leave `pending` exactly once and tickets are admitted exactly once.
//! Both are single conditional writes in the repository, so concurrent
//! callbacks, polls and scans cannot double-apply:
//!
//! ```text
//! UPDATE orders  SET status = 'paid'     WHERE id = $1 AND status = 'pending'
//! UPDATE tickets SET checked_in = TRUE   WHERE id = $1 AND checked_in = FALSE
//! ```
//!
//! ## 2. Reducer-driven polling
//!
//! The [`poller`] is a reducer on the store runtime. Its timer is one
//! cancellable effect, so restarting or dropping a poller never leaves a
//! loop behind.
//!
//! ## 3. Idempotent issuance
//!
//! Tickets are keyed by (order, line, unit); issuing twice returns the same
//! tickets.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod api;
pub mod app;
pub mod checkout;
pub mod config;
pub mod issuance;
pub mod metrics;
pub mod payment_gateway;
pub mod poller;
pub mod promo;
pub mod server;
pub mod storage;
pub mod types;
pub mod validation;
pub mod verification;

pub use aggregates::{Order, OrderDraft, OrderError, Transition};
pub use app::{build_state, BoxOfficeApp, StartupError};
pub use checkout::{CheckoutError, CheckoutRequest, CheckoutService, PaymentResult, PaymentStatus};
pub use config::Config;
pub use issuance::TicketIssuer;
pub use poller::{PaymentStatusPoller, PollOutcome, PollerConfig};
pub use storage::Repositories;
pub use types::*;
pub use verification::{AdmitOutcome, CheckIn, GateError, Verification, VerificationGate};
