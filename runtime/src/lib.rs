//! # Box Office Runtime
//!
//! Store runtime for the box office reducers.
//!
//! The [`Store`] owns a reducer's state, runs the effects the reducer returns
//! and feeds the actions those effects produce back into the reducer.
//!
//! ## Core Components
//!
//! - **Store**: Manages state and executes effects
//! - **Cancellation registry**: Tracks [`Effect::Cancellable`] tasks by id so
//!   timers can be stopped exactly once
//! - **Action broadcast**: Observers see every action produced by effects
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_runtime::Store;
//!
//! let store = Store::new(PollerState::default(), PollerReducer::default(), env);
//!
//! // Send an action
//! store.send(PollerAction::Start { token }).await?;
//!
//! // Read state
//! let attempts = store.state(|s| s.attempts).await;
//! ```

use boxoffice_core::effect::{Effect, EffectId};
use boxoffice_core::reducer::Reducer;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::AbortHandle;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Default capacity of the action broadcast channel.
const DEFAULT_BROADCAST_CAPACITY: usize = 16;

struct Registration {
    token: u64,
    handle: AbortHandle,
}

struct Inner<S, A, E, R> {
    state: RwLock<S>,
    reducer: R,
    environment: E,
    cancellations: Mutex<HashMap<EffectId, Registration>>,
    next_registration: AtomicU64,
    shutdown: AtomicBool,
    /// Every action produced by an effect is broadcast here before it is
    /// fed back into the reducer.
    action_broadcast: broadcast::Sender<A>,
}

/// The Store - runtime for a reducer
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
/// - `E`: Environment type
/// - `R`: Reducer implementation
///
/// Cloning a store is cheap: clones share state, the effect registry and the
/// action broadcast.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    inner: Arc<Inner<S, A, E, R>>,
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Clone + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new store with initial state, reducer, and environment
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_broadcast_capacity(initial_state, reducer, environment, DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a store with a custom action broadcast capacity
    ///
    /// Slow observers that fall more than `capacity` actions behind skip
    /// the oldest actions.
    #[must_use]
    pub fn with_broadcast_capacity(
        initial_state: S,
        reducer: R,
        environment: E,
        capacity: usize,
    ) -> Self {
        let (action_broadcast, _) = broadcast::channel(capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(initial_state),
                reducer,
                environment,
                cancellations: Mutex::new(HashMap::new()),
                next_registration: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                action_broadcast,
            }),
        }
    }

    /// Send an action to the store
    ///
    /// Runs the reducer under the state write lock, releases the lock and
    /// starts the returned effects. Effects run in the background; the call
    /// does not wait for them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`Store::shutdown`].
    pub async fn send(&self, action: A) -> Result<(), StoreError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            tracing::warn!("Rejected action: store is shutting down");
            return Err(StoreError::ShutdownInProgress);
        }

        let effects = {
            let mut state = self.inner.state.write().await;

            let span = tracing::debug_span!("reducer_execution");
            let _enter = span.enter();

            let start = Instant::now();
            let effects = self
                .inner
                .reducer
                .reduce(&mut *state, action, &self.inner.environment);
            metrics::store::record_action(start.elapsed());

            tracing::trace!("Reducer completed, returned {} effects", effects.len());
            effects
        };

        for effect in effects {
            self.execute(effect);
        }

        Ok(())
    }

    /// Send an action and wait for a matching action produced by effects
    ///
    /// Subscribes to the action broadcast before sending, so a result that
    /// arrives immediately is not missed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`]: no matching action before `timeout`
    /// - [`StoreError::ChannelClosed`]: the action broadcast closed
    /// - [`StoreError::ShutdownInProgress`]: the store is shutting down
    pub async fn send_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        let mut rx = self.inner.action_broadcast.subscribe();

        self.send(action).await?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // If the terminal action was dropped, the timeout catches it
                        tracing::warn!(skipped, "Action observer lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    },
                }
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Subscribe to all actions produced by effects
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.inner.action_broadcast.subscribe()
    }

    /// Read state through a closure
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.inner.state.read().await;
        f(&*state)
    }

    /// Stop the cancellable effect registered under `id`
    ///
    /// Returns `true` if a running effect was stopped.
    pub fn cancel(&self, id: &EffectId) -> bool {
        let removed = self.registry().remove(id);
        match removed {
            Some(registration) => {
                registration.handle.abort();
                metrics::store::record_cancellation();
                tracing::debug!(effect_id = %id, "Cancelled effect");
                true
            },
            None => false,
        }
    }

    /// Whether a cancellable effect is currently registered under `id`
    #[must_use]
    pub fn is_active(&self, id: &EffectId) -> bool {
        self.registry().contains_key(id)
    }

    /// Stop accepting actions and abort every cancellable effect
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        let drained: Vec<(EffectId, Registration)> = self.registry().drain().collect();
        for (id, registration) in drained {
            registration.handle.abort();
            metrics::store::record_cancellation();
            tracing::debug!(effect_id = %id, "Cancelled effect on shutdown");
        }
        tracing::info!("Store shut down");
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<EffectId, Registration>> {
        self.inner
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, effect: Effect<A>) {
        match effect {
            Effect::None => {
                metrics::store::record_effect("none");
            },
            Effect::Cancel(id) => {
                metrics::store::record_effect("cancel");
                self.cancel(&id);
            },
            Effect::Cancellable { id, effect } => {
                metrics::store::record_effect("cancellable");
                self.spawn_cancellable(id, *effect);
            },
            other => {
                tokio::spawn(self.run(other));
            },
        }
    }

    /// Register and start a cancellable effect
    ///
    /// The registry lock is held while the task is spawned so the task's own
    /// deregistration cannot overtake its registration.
    fn spawn_cancellable(&self, id: EffectId, effect: Effect<A>) {
        let mut registry = self.registry();
        let token = self.inner.next_registration.fetch_add(1, Ordering::Relaxed);

        let store = self.clone();
        let task_id = id.clone();
        let work = self.run(effect);
        let handle = tokio::spawn(async move {
            work.await;
            store.deregister(&task_id, token);
        });

        let previous = registry.insert(
            id.clone(),
            Registration {
                token,
                handle: handle.abort_handle(),
            },
        );
        drop(registry);

        if let Some(previous) = previous {
            previous.handle.abort();
            metrics::store::record_cancellation();
            tracing::trace!(effect_id = %id, "Replaced running effect");
        }
    }

    fn deregister(&self, id: &EffectId, token: u64) {
        let mut registry = self.registry();
        if registry.get(id).is_some_and(|r| r.token == token) {
            registry.remove(id);
        }
    }

    /// Broadcast an effect-produced action and feed it back into the reducer
    async fn feed_back(&self, action: A) {
        let _ = self.inner.action_broadcast.send(action.clone());
        if let Err(error) = self.send(action).await {
            tracing::debug!(%error, "Dropped effect output");
        }
    }

    fn run(&self, effect: Effect<A>) -> BoxFuture<'static, ()> {
        let store = self.clone();
        async move {
            match effect {
                Effect::None => {
                    metrics::store::record_effect("none");
                },
                Effect::Future(fut) => {
                    metrics::store::record_effect("future");
                    if let Some(action) = fut.await {
                        store.feed_back(action).await;
                    }
                },
                Effect::Delay { duration, action } => {
                    metrics::store::record_effect("delay");
                    tokio::time::sleep(duration).await;
                    store.feed_back(*action).await;
                },
                Effect::Parallel(effects) => {
                    metrics::store::record_effect("parallel");
                    let runs: Vec<_> = effects.into_iter().map(|e| store.run(e)).collect();
                    futures::future::join_all(runs).await;
                },
                Effect::Sequential(effects) => {
                    metrics::store::record_effect("sequential");
                    for effect in effects {
                        store.run(effect).await;
                    }
                },
                Effect::Cancellable { id, effect } => {
                    metrics::store::record_effect("cancellable");
                    store.spawn_cancellable(id, *effect);
                },
                Effect::Cancel(id) => {
                    metrics::store::record_effect("cancel");
                    store.cancel(&id);
                },
            }
        }
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::{smallvec, SmallVec};

    #[derive(Clone, Debug, PartialEq)]
    enum CounterAction {
        Add(u32),
        AddLater(u32),
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = u32;
        type Action = CounterAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut u32,
            action: CounterAction,
            _env: &(),
        ) -> SmallVec<[Effect<CounterAction>; 4]> {
            match action {
                CounterAction::Add(n) => {
                    *state += n;
                    SmallVec::new()
                },
                CounterAction::AddLater(n) => smallvec![Effect::Delay {
                    duration: Duration::from_secs(1),
                    action: Box::new(CounterAction::Add(n)),
                }],
            }
        }
    }

    #[tokio::test]
    async fn send_applies_reducer() {
        let store = Store::new(0, CounterReducer, ());
        store.send(CounterAction::Add(3)).await.unwrap();
        assert_eq!(store.state(|s| *s).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_action_is_fed_back_and_broadcast() {
        let store = Store::new(0, CounterReducer, ());
        let result = store
            .send_and_wait_for(
                CounterAction::AddLater(5),
                |a| matches!(a, CounterAction::Add(_)),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(result, CounterAction::Add(5));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_actions() {
        let store = Store::new(0, CounterReducer, ());
        store.shutdown();
        assert_eq!(
            store.send(CounterAction::Add(1)).await,
            Err(StoreError::ShutdownInProgress)
        );
    }
}
