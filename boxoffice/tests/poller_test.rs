//! Payment status poller tests.
//!
//! Runs the poller on the store runtime with paused time, against a
//! scripted status source.
//!
//! Run with: `cargo test --test poller_test`

#![allow(clippy::unwrap_used)]

use boxoffice::checkout::{PaymentStatus, PaymentStatusView};
use boxoffice::poller::source::StatusFuture;
use boxoffice::poller::{PaymentStatusPoller, PollOutcome, PollerConfig, SourceError, StatusSource};
use boxoffice::types::{CorrelationToken, OrderId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Answer = Result<PaymentStatusView, SourceError>;

/// Answers from a per-token script, then `pending` forever.
#[derive(Default)]
struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Answer>>>,
    checks: Mutex<HashMap<String, u32>>,
}

impl ScriptedSource {
    fn script(&self, token: &str, answers: Vec<Answer>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(token.to_string(), answers.into());
    }

    fn checks(&self, token: &str) -> u32 {
        self.checks.lock().unwrap().get(token).copied().unwrap_or(0)
    }
}

impl StatusSource for ScriptedSource {
    fn check(&self, token: &CorrelationToken) -> StatusFuture {
        *self
            .checks
            .lock()
            .unwrap()
            .entry(token.as_str().to_string())
            .or_insert(0) += 1;
        let answer = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(token.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(pending()));
        Box::pin(async move { answer })
    }
}

fn pending() -> PaymentStatusView {
    PaymentStatusView {
        status: PaymentStatus::Pending,
        order_id: None,
        reason: None,
    }
}

fn paid(order_id: OrderId) -> PaymentStatusView {
    PaymentStatusView {
        status: PaymentStatus::Paid,
        order_id: Some(order_id),
        reason: None,
    }
}

fn config(max_attempts: u32) -> PollerConfig {
    PollerConfig {
        interval: Duration::from_secs(2),
        max_attempts,
    }
}

fn token(value: &str) -> CorrelationToken {
    CorrelationToken::new(value)
}

#[tokio::test(start_paused = true)]
async fn pending_three_times_then_paid_resolves_on_fourth_check() {
    let source = Arc::new(ScriptedSource::default());
    let order_id = OrderId::new();
    source.script("ws_CO_1", vec![Ok(pending()), Ok(pending()), Ok(pending()), Ok(paid(order_id))]);
    let poller = PaymentStatusPoller::new(source.clone(), config(60));

    let outcome = poller.poll_until_resolved(token("ws_CO_1")).await;

    assert_eq!(outcome, PollOutcome::Paid { order_id });
    assert_eq!(source.checks("ws_CO_1"), 4);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.checks("ws_CO_1"), 4);
    assert!(!poller.is_polling().await);
    assert!(!poller.has_pending_timer());
}

#[tokio::test(start_paused = true)]
async fn never_resolving_times_out_after_max_attempts() {
    let source = Arc::new(ScriptedSource::default());
    let poller = PaymentStatusPoller::new(source.clone(), config(5));

    let outcome = poller.poll_until_resolved(token("ws_CO_2")).await;

    assert_eq!(outcome, PollOutcome::TimedOut);
    assert_eq!(source.checks("ws_CO_2"), 5);
    assert_eq!(poller.checks_made().await, 5);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.checks("ws_CO_2"), 5);
}

#[tokio::test(start_paused = true)]
async fn check_errors_count_as_attempts_and_polling_continues() {
    let source = Arc::new(ScriptedSource::default());
    let order_id = OrderId::new();
    source.script(
        "ws_CO_3",
        vec![
            Err(SourceError("connection reset".to_string())),
            Err(SourceError("502 from status endpoint".to_string())),
            Ok(paid(order_id)),
        ],
    );
    let poller = PaymentStatusPoller::new(source.clone(), config(60));

    assert_eq!(
        poller.poll_until_resolved(token("ws_CO_3")).await,
        PollOutcome::Paid { order_id }
    );
    assert_eq!(source.checks("ws_CO_3"), 3);
}

#[tokio::test(start_paused = true)]
async fn errors_alone_exhaust_the_attempts() {
    let source = Arc::new(ScriptedSource::default());
    source.script(
        "ws_CO_4",
        (0..3).map(|_| Err(SourceError("timeout".to_string()))).collect(),
    );
    let poller = PaymentStatusPoller::new(source.clone(), config(3));

    assert_eq!(poller.poll_until_resolved(token("ws_CO_4")).await, PollOutcome::TimedOut);
    assert_eq!(source.checks("ws_CO_4"), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_payment_ends_polling_with_reason() {
    let source = Arc::new(ScriptedSource::default());
    let order_id = OrderId::new();
    source.script(
        "ws_CO_5",
        vec![Ok(PaymentStatusView {
            status: PaymentStatus::Failed,
            order_id: Some(order_id),
            reason: Some("Request cancelled by user".to_string()),
        })],
    );
    let poller = PaymentStatusPoller::new(source.clone(), config(60));

    assert_eq!(
        poller.poll_until_resolved(token("ws_CO_5")).await,
        PollOutcome::Failed {
            order_id: Some(order_id),
            reason: Some("Request cancelled by user".to_string()),
        }
    );
    assert_eq!(source.checks("ws_CO_5"), 1);
}

#[tokio::test(start_paused = true)]
async fn first_check_waits_one_interval() {
    let source = Arc::new(ScriptedSource::default());
    let poller = PaymentStatusPoller::new(source.clone(), config(60));

    poller.start(token("ws_CO_6")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.checks("ws_CO_6"), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(source.checks("ws_CO_6"), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_future_ticks() {
    let source = Arc::new(ScriptedSource::default());
    let poller = PaymentStatusPoller::new(source.clone(), config(60));

    poller.start(token("ws_CO_7")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(source.checks("ws_CO_7"), 2);

    poller.cancel().await.unwrap();
    assert!(!poller.is_polling().await);
    assert!(!poller.has_pending_timer());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(source.checks("ws_CO_7"), 2);
    assert_eq!(poller.last_outcome().await, Some(PollOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn new_session_replaces_the_old_loop() {
    let source = Arc::new(ScriptedSource::default());
    let order_id = OrderId::new();
    source.script("ws_CO_new", vec![Ok(paid(order_id))]);
    let poller = PaymentStatusPoller::new(source.clone(), config(60));

    poller.start(token("ws_CO_old")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(source.checks("ws_CO_old"), 1);

    let outcome = poller.poll_until_resolved(token("ws_CO_new")).await;
    assert_eq!(outcome, PollOutcome::Paid { order_id });

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(source.checks("ws_CO_old"), 1);
    assert_eq!(source.checks("ws_CO_new"), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_poller_stops_its_timer() {
    let source = Arc::new(ScriptedSource::default());
    let poller = PaymentStatusPoller::new(source.clone(), config(60));

    poller.start(token("ws_CO_8")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(source.checks("ws_CO_8"), 1);

    drop(poller);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(source.checks("ws_CO_8"), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_attempts_times_out_without_checking() {
    let source = Arc::new(ScriptedSource::default());
    let poller = PaymentStatusPoller::new(source.clone(), config(0));

    assert_eq!(poller.poll_until_resolved(token("ws_CO_9")).await, PollOutcome::TimedOut);
    assert_eq!(source.checks("ws_CO_9"), 0);
}

/// A status endpoint that accepts the request and never answers.
struct Unresponsive;

impl StatusSource for Unresponsive {
    fn check(&self, _token: &CorrelationToken) -> StatusFuture {
        Box::pin(std::future::pending())
    }
}

#[tokio::test(start_paused = true)]
async fn hung_check_times_out_and_clears_the_session() {
    let poller = PaymentStatusPoller::new(Arc::new(Unresponsive), config(2));

    let outcome = poller.poll_until_resolved(token("ws_CO_hung")).await;

    assert_eq!(outcome, PollOutcome::TimedOut);
    assert!(!poller.is_polling().await);
    assert!(!poller.has_pending_timer());
    assert_eq!(poller.last_outcome().await, Some(PollOutcome::TimedOut));
}
