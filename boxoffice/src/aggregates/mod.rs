//! Aggregates for the box office.
//!
//! - Order: purchase attempt, its totals and its single terminal transition

pub mod order;

pub use order::{Order, OrderDraft, OrderError, Transition};
