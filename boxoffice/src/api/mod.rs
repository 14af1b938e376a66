//! HTTP API for checkout, payments, promos and check-in.
//!
//! - Checkout: create an order and start its payment, retry, look it up
//! - Payments: read-only status, provider verify, provider callback
//! - Promo: validate a code against a base amount
//! - Verification: verify, admit and check in scanned tickets

pub mod checkout;
pub mod error;
pub mod payments;
pub mod promo;
pub mod verification;

pub use checkout::{create_checkout, get_order, retry_payment};
pub use payments::{payment_callback, payment_status, verify_payment};
pub use promo::validate_promo;
pub use verification::{admit_ticket, check_in_ticket, verify_ticket};
