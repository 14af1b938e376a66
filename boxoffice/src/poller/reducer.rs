//! Poller reducer.
//!
//! One session polls one correlation token. A session is armed with a
//! cancellable delay; when the delay fires, exactly one status check runs
//! under the same effect id, and only its response arms the next delay.
//! Every action carries the session id it was produced for, so anything
//! arriving for an older session is ignored.

use super::source::StatusSource;
use crate::checkout::{PaymentStatus, PaymentStatusView};
use crate::metrics;
use crate::types::{CorrelationToken, OrderId};
use boxoffice_core::effect::{Effect, EffectId};
use boxoffice_core::reducer::Reducer;
use boxoffice_core::{smallvec, SmallVec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// How a polling session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    /// The order is paid
    Paid {
        /// Paid order
        order_id: OrderId,
    },
    /// The payment failed
    Failed {
        /// Failed order, when known
        order_id: Option<OrderId>,
        /// Provider reason, when known
        reason: Option<String>,
    },
    /// Attempts ran out while the payment was still pending. Not a failure.
    TimedOut,
    /// Stopped by the caller or replaced by a newer session
    Cancelled,
}

/// The session currently being polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSession {
    /// Session id assigned by the handle
    pub id: u64,
    /// Token being polled
    pub token: CorrelationToken,
    /// Checks started so far
    pub attempts: u32,
    /// Whether a check is waiting for its response
    pub in_flight: bool,
}

/// Poller state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerState {
    /// Active session
    pub session: Option<PollSession>,
    /// Checks made over the poller's lifetime
    pub checks: u32,
    /// Outcome of the last finished session
    pub last_outcome: Option<PollOutcome>,
}

/// Poller actions
#[derive(Debug, Clone, PartialEq)]
pub enum PollerAction {
    /// Start polling `token`, replacing any active session
    Start {
        /// New session id
        session: u64,
        /// Token to poll
        token: CorrelationToken,
    },
    /// Timer fired: make one check
    Tick {
        /// Session the timer belongs to
        session: u64,
    },
    /// A check answered
    StatusReceived {
        /// Session the check belongs to
        session: u64,
        /// Status, or the check's error message
        result: Result<PaymentStatusView, String>,
    },
    /// Stop the active session
    Cancel,
    /// The waiter for `session` stopped waiting; end it as timed out
    Expire {
        /// Session given up on
        session: u64,
    },
    /// A session ended (emitted by the reducer, observed by waiters)
    Finished {
        /// Session that ended
        session: u64,
        /// Its token
        token: CorrelationToken,
        /// How it ended
        outcome: PollOutcome,
    },
}

/// Poller dependencies
#[derive(Clone)]
pub struct PollerEnvironment {
    /// Where statuses come from
    pub source: Arc<dyn StatusSource>,
    /// Wait between checks
    pub interval: Duration,
    /// Checks before giving up
    pub max_attempts: u32,
    /// Effect id of this poller's timer and in-flight check
    pub timer_id: EffectId,
}

/// Poller reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct PollerReducer;

impl PollerReducer {
    /// Create a poller reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn arm_timer(session: u64, env: &PollerEnvironment) -> Effect<PollerAction> {
        Effect::Delay {
            duration: env.interval,
            action: Box::new(PollerAction::Tick { session }),
        }
        .cancellable(env.timer_id.clone())
    }

    fn check(session: u64, token: &CorrelationToken, env: &PollerEnvironment) -> Effect<PollerAction> {
        let pending = env.source.check(token);
        Effect::Future(Box::pin(async move {
            let result = pending.await.map_err(|e| e.to_string());
            Some(PollerAction::StatusReceived { session, result })
        }))
        .cancellable(env.timer_id.clone())
    }

    fn finish(state: &mut PollerState, outcome: PollOutcome) -> SmallVec<[Effect<PollerAction>; 4]> {
        let Some(session) = state.session.take() else {
            return SmallVec::new();
        };
        tracing::info!(
            session = session.id,
            token = %session.token,
            attempts = session.attempts,
            ?outcome,
            "Polling finished"
        );
        state.last_outcome = Some(outcome.clone());
        smallvec![Effect::send(PollerAction::Finished {
            session: session.id,
            token: session.token,
            outcome,
        })]
    }

    /// Outcome for a status answer, `None` while it is still pending.
    fn resolve(result: &Result<PaymentStatusView, String>) -> Option<PollOutcome> {
        match result {
            Ok(PaymentStatusView {
                status: PaymentStatus::Paid,
                order_id: Some(order_id),
                ..
            }) => Some(PollOutcome::Paid { order_id: *order_id }),
            Ok(PaymentStatusView {
                status: PaymentStatus::Failed,
                order_id,
                reason,
            }) => Some(PollOutcome::Failed {
                order_id: *order_id,
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

impl Reducer for PollerReducer {
    type State = PollerState;
    type Action = PollerAction;
    type Environment = PollerEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            PollerAction::Start { session, token } => {
                let mut effects = Self::finish(state, PollOutcome::Cancelled);

                state.session = Some(PollSession {
                    id: session,
                    token: token.clone(),
                    attempts: 0,
                    in_flight: false,
                });

                if env.max_attempts == 0 {
                    effects.extend(Self::finish(state, PollOutcome::TimedOut));
                    return effects;
                }

                tracing::debug!(session, %token, "Polling started");
                // Replaces whatever the previous session had running
                effects.push(Self::arm_timer(session, env));
                effects
            },

            PollerAction::Tick { session } => {
                let Some(active) = state.session.as_mut() else {
                    return SmallVec::new();
                };
                if active.id != session || active.in_flight {
                    return SmallVec::new();
                }

                active.attempts += 1;
                active.in_flight = true;
                state.checks += 1;
                metrics::record_poll_check();
                tracing::debug!(session, attempt = active.attempts, "Checking payment status");

                smallvec![Self::check(session, &active.token, env)]
            },

            PollerAction::StatusReceived { session, result } => {
                let Some(active) = state.session.as_mut() else {
                    return SmallVec::new();
                };
                if active.id != session {
                    return SmallVec::new();
                }
                active.in_flight = false;

                if let Some(outcome) = Self::resolve(&result) {
                    return Self::finish(state, outcome);
                }

                if let Err(error) = &result {
                    tracing::warn!(session, attempt = active.attempts, %error, "Status check failed");
                }

                if active.attempts >= env.max_attempts {
                    return Self::finish(state, PollOutcome::TimedOut);
                }

                smallvec![Self::arm_timer(session, env)]
            },

            PollerAction::Cancel => {
                if state.session.is_none() {
                    return SmallVec::new();
                }
                let mut effects: SmallVec<[Effect<PollerAction>; 4]> =
                    smallvec![Effect::Cancel(env.timer_id.clone())];
                effects.extend(Self::finish(state, PollOutcome::Cancelled));
                effects
            },

            PollerAction::Expire { session } => {
                if state.session.as_ref().is_none_or(|active| active.id != session) {
                    return SmallVec::new();
                }
                let mut effects: SmallVec<[Effect<PollerAction>; 4]> =
                    smallvec![Effect::Cancel(env.timer_id.clone())];
                effects.extend(Self::finish(state, PollOutcome::TimedOut));
                effects
            },

            PollerAction::Finished { .. } => SmallVec::new(),
        }
    }
}
