//! Payment status poller.
//!
//! A [`PaymentStatusPoller`] asks a [`StatusSource`] whether a payment has
//! settled, at a fixed interval and for a bounded number of checks. It runs
//! as a reducer on a [`Store`]: the timer and the in-flight check share one
//! cancellable effect id, so a poller never has more than one loop running.
//!
//! ```ignore
//! let poller = PaymentStatusPoller::new(source, PollerConfig::default());
//! match poller.poll_until_resolved(receipt.correlation_token).await {
//!     PollOutcome::Paid { order_id } => show_tickets(order_id),
//!     PollOutcome::TimedOut => show_order_history(),
//!     other => show_failure(other),
//! }
//! ```

pub mod reducer;
pub mod source;

pub use reducer::{PollOutcome, PollerAction, PollerEnvironment, PollerReducer, PollerState};
pub use source::{CheckoutStatusSource, HttpStatusSource, SourceError, StatusSource};

use crate::types::CorrelationToken;
use boxoffice_core::effect::EffectId;
use boxoffice_runtime::{Store, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Slack on top of each interval when waiting for a session to finish
const CHECK_GRACE: Duration = Duration::from_secs(10);

/// Poller timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Wait before each check
    pub interval: Duration,
    /// Checks before giving up
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

type PollerStore = Store<PollerState, PollerAction, PollerEnvironment, PollerReducer>;

/// Handle to one poller. Dropping it stops its timer.
pub struct PaymentStatusPoller {
    store: PollerStore,
    timer_id: EffectId,
    sessions: AtomicU64,
    config: PollerConfig,
}

impl PaymentStatusPoller {
    /// Create an idle poller
    #[must_use]
    pub fn new(source: Arc<dyn StatusSource>, config: PollerConfig) -> Self {
        let timer_id = EffectId::new(format!("payment-poller-{}", uuid::Uuid::new_v4()));
        let env = PollerEnvironment {
            source,
            interval: config.interval,
            max_attempts: config.max_attempts,
            timer_id: timer_id.clone(),
        };

        Self {
            store: Store::new(PollerState::default(), PollerReducer::new(), env),
            timer_id,
            sessions: AtomicU64::new(0),
            config,
        }
    }

    /// Poller timing
    #[must_use]
    pub const fn config(&self) -> PollerConfig {
        self.config
    }

    /// Poll `token` until it is paid or failed, attempts run out, or the
    /// session is cancelled. Starting here cancels any active session.
    pub async fn poll_until_resolved(&self, token: CorrelationToken) -> PollOutcome {
        let session = self.next_session();
        let deadline = (self.config.interval + CHECK_GRACE).saturating_mul(self.config.max_attempts.saturating_add(1));

        let finished = self
            .store
            .send_and_wait_for(
                PollerAction::Start { session, token },
                |action| matches!(action, PollerAction::Finished { session: s, .. } if *s == session),
                deadline,
            )
            .await;

        match finished {
            Ok(PollerAction::Finished { outcome, .. }) => outcome,
            Ok(_) | Err(StoreError::ChannelClosed | StoreError::ShutdownInProgress) => PollOutcome::Cancelled,
            Err(StoreError::Timeout) => {
                tracing::warn!(session, "Poller session did not finish in time");
                if let Err(error) = self.store.send(PollerAction::Expire { session }).await {
                    tracing::debug!(session, %error, "Poller already shut down");
                }
                PollOutcome::TimedOut
            },
        }
    }

    /// Start polling `token` in the background and return the session id.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] if the poller was shut down.
    pub async fn start(&self, token: CorrelationToken) -> Result<u64, StoreError> {
        let session = self.next_session();
        self.store.send(PollerAction::Start { session, token }).await?;
        Ok(session)
    }

    /// Stop the active session. Order state is left as it is.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] if the poller was shut down.
    pub async fn cancel(&self) -> Result<(), StoreError> {
        self.store.send(PollerAction::Cancel).await
    }

    /// Whether a session is active
    pub async fn is_polling(&self) -> bool {
        self.store.state(|s| s.session.is_some()).await
    }

    /// Checks made over the poller's lifetime
    pub async fn checks_made(&self) -> u32 {
        self.store.state(|s| s.checks).await
    }

    /// Outcome of the last finished session
    pub async fn last_outcome(&self) -> Option<PollOutcome> {
        self.store.state(|s| s.last_outcome.clone()).await
    }

    /// Whether a timer or check is currently scheduled
    #[must_use]
    pub fn has_pending_timer(&self) -> bool {
        self.store.is_active(&self.timer_id)
    }

    fn next_session(&self) -> u64 {
        self.sessions.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Drop for PaymentStatusPoller {
    fn drop(&mut self) {
        if self.store.cancel(&self.timer_id) {
            tracing::debug!(timer_id = %self.timer_id, "Poller dropped, timer cancelled");
        }
    }
}
