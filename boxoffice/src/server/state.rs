//! Application state for the box office HTTP server.
//!
//! Contains all shared resources needed by HTTP handlers:
//! - Checkout service (orders, payments, issuance)
//! - Verification gate (check-in)
//! - Poller settings for background reconciliation
//! - Metrics recorder (for `/metrics`)

use crate::checkout::CheckoutService;
use crate::poller::{CheckoutStatusSource, PaymentStatusPoller, PollOutcome, PollerConfig};
use crate::types::CorrelationToken;
use crate::verification::VerificationGate;
use boxoffice_runtime::metrics::MetricsServer;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Checkout, reconciliation and order lookup
    pub checkout: CheckoutService,

    /// Ticket verification and admission
    pub gate: VerificationGate,

    /// Poll the provider after each initiation, `None` to rely on callbacks only
    pub reconcile_with: Option<PollerConfig>,

    /// Prometheus recorder, when installed
    pub metrics: Option<Arc<MetricsServer>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(checkout: CheckoutService, gate: VerificationGate) -> Self {
        Self {
            checkout,
            gate,
            reconcile_with: None,
            metrics: None,
        }
    }

    /// Reconcile each new payment in the background with these poller settings
    #[must_use]
    pub fn with_background_reconciliation(mut self, config: PollerConfig) -> Self {
        self.reconcile_with = Some(config);
        self
    }

    /// Serve this recorder on `/metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsServer>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start a background poller that verifies `token` with the provider
    /// until the order settles. The poller stops when the task ends.
    pub fn spawn_reconciliation(&self, token: CorrelationToken) {
        let Some(config) = self.reconcile_with else {
            return;
        };
        let source = Arc::new(CheckoutStatusSource::reconciling(self.checkout.clone()));

        tokio::spawn(async move {
            let poller = PaymentStatusPoller::new(source, config);
            let outcome = poller.poll_until_resolved(token.clone()).await;
            match outcome {
                PollOutcome::TimedOut => {
                    tracing::info!(%token, "Payment still pending after polling, waiting for callback");
                },
                other => tracing::debug!(%token, outcome = ?other, "Background reconciliation finished"),
            }
        });
    }
}
