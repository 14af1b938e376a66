//! Business metrics for the box office.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `boxoffice_orders_total{status}` - Orders by lifecycle step (created, paid, failed)
//! - `boxoffice_payment_initiations_total{rail,result}` - Payment initiations per rail
//! - `boxoffice_payment_revenue_cents_total` - Revenue from paid orders in cents
//! - `boxoffice_tickets_issued_total` - Tickets minted
//! - `boxoffice_admissions_total{result}` - Check-in outcomes
//! - `boxoffice_poll_checks_total` - Status checks made by pollers
//! - `boxoffice_promo_redemptions_total{result}` - Promo redemptions (counted, over cap)
//!
//! ## Histograms
//! - `boxoffice_payment_confirmation_seconds` - Time from order creation to paid

use crate::types::{Money, PaymentRail, RedemptionOutcome};
use metrics::{describe_counter, describe_histogram};

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "boxoffice_orders_total",
        "Total number of orders by status (created, paid, failed)"
    );
    describe_counter!(
        "boxoffice_payment_initiations_total",
        "Total number of payment initiations by rail and result (ok, rejected, error)"
    );
    describe_counter!(
        "boxoffice_payment_revenue_cents_total",
        "Total revenue from paid orders in cents"
    );
    describe_histogram!(
        "boxoffice_payment_confirmation_seconds",
        "Time from order creation to payment confirmation"
    );
    describe_counter!("boxoffice_tickets_issued_total", "Total number of tickets issued");
    describe_counter!(
        "boxoffice_admissions_total",
        "Check-in attempts by result (admitted, already_admitted, not_found, forbidden)"
    );
    describe_counter!(
        "boxoffice_poll_checks_total",
        "Total number of payment status checks made by pollers"
    );
    describe_counter!(
        "boxoffice_promo_redemptions_total",
        "Promo redemptions recorded for paid orders by result (counted, over_cap)"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a pending order.
pub fn record_order_created() {
    metrics::counter!("boxoffice_orders_total", "status" => "created").increment(1);
    tracing::debug!("Recorded order_created metric");
}

/// Record an order reaching paid.
///
/// # Arguments
///
/// * `total` - Order total
/// * `duration_secs` - Time from creation to confirmation in seconds
pub fn record_order_paid(total: Money, duration_secs: f64) {
    metrics::counter!("boxoffice_orders_total", "status" => "paid").increment(1);
    metrics::counter!("boxoffice_payment_revenue_cents_total").increment(total.cents());
    metrics::histogram!("boxoffice_payment_confirmation_seconds").record(duration_secs);
    tracing::debug!(total_cents = total.cents(), duration_secs, "Recorded order_paid metric");
}

/// Record an order reaching failed.
pub fn record_order_failed() {
    metrics::counter!("boxoffice_orders_total", "status" => "failed").increment(1);
    tracing::debug!("Recorded order_failed metric");
}

/// Record a payment initiation attempt.
///
/// # Arguments
///
/// * `rail` - Payment rail
/// * `result` - `ok`, `rejected` (validation) or `error` (provider/network)
pub fn record_payment_initiation(rail: PaymentRail, result: &'static str) {
    metrics::counter!(
        "boxoffice_payment_initiations_total",
        "rail" => rail.as_str(),
        "result" => result
    )
    .increment(1);
    tracing::debug!(%rail, result, "Recorded payment_initiation metric");
}

/// Record newly minted tickets.
pub fn record_tickets_issued(count: u64) {
    if count > 0 {
        metrics::counter!("boxoffice_tickets_issued_total").increment(count);
    }
    tracing::debug!(count, "Recorded tickets_issued metric");
}

/// Record a check-in outcome.
pub fn record_admission(result: &'static str) {
    metrics::counter!("boxoffice_admissions_total", "result" => result).increment(1);
    tracing::debug!(result, "Recorded admission metric");
}

/// Record one poller status check.
pub fn record_poll_check() {
    metrics::counter!("boxoffice_poll_checks_total").increment(1);
}

/// Record a newly recorded promo redemption.
pub fn record_promo_redemption(outcome: RedemptionOutcome) {
    metrics::counter!("boxoffice_promo_redemptions_total", "result" => outcome.as_str()).increment(1);
    tracing::debug!(result = outcome.as_str(), "Recorded promo_redemption metric");
}
