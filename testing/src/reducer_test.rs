//! Given-When-Then harness for reducers.

#![allow(clippy::module_name_repetitions)]

use boxoffice_core::{effect::Effect, reducer::Reducer};

enum Then<S, A> {
    State(Box<dyn FnOnce(&S)>),
    Effects(Box<dyn FnOnce(&[Effect<A>])>),
}

/// Runs one action through a reducer and checks the outcome.
///
/// ```ignore
/// ReducerTest::new(PollerReducer::new())
///     .with_env(env(source))
///     .given_state(PollerState::default())
///     .when_action(PollerAction::Start { session: 1, token })
///     .then_state(|state| assert!(state.session.is_some()))
///     .then_effects(|effects| assertions::assert_has_delay(effects))
///     .run();
/// ```
pub struct ReducerTest<R: Reducer> {
    reducer: R,
    env: Option<R::Environment>,
    state: Option<R::State>,
    action: Option<R::Action>,
    checks: Vec<Then<R::State, R::Action>>,
}

impl<R: Reducer> ReducerTest<R> {
    /// Harness for `reducer`
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            env: None,
            state: None,
            action: None,
            checks: Vec::new(),
        }
    }

    /// Environment passed to the reducer
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.env = Some(env);
        self
    }

    /// State before the action
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.state = Some(state);
        self
    }

    /// Action under test
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Check the state after the action
    #[must_use]
    pub fn then_state(mut self, check: impl FnOnce(&R::State) + 'static) -> Self {
        self.checks.push(Then::State(Box::new(check)));
        self
    }

    /// Check the returned effects
    #[must_use]
    pub fn then_effects(mut self, check: impl FnOnce(&[Effect<R::Action>]) + 'static) -> Self {
        self.checks.push(Then::Effects(Box::new(check)));
        self
    }

    /// Reduce and run the checks in the order they were added.
    ///
    /// # Panics
    ///
    /// When the environment, state or action is missing, or a check fails.
    #[allow(clippy::panic)]
    pub fn run(self) {
        let (Some(env), Some(mut state), Some(action)) = (self.env, self.state, self.action) else {
            panic!("ReducerTest needs with_env, given_state and when_action before run");
        };

        let effects = self.reducer.reduce(&mut state, action, &env);

        for check in self.checks {
            match check {
                Then::State(check) => check(&state),
                Then::Effects(check) => check(&effects),
            }
        }
    }
}

/// Effect assertions
#[allow(clippy::panic)]
pub mod assertions {
    use boxoffice_core::effect::{Effect, EffectId};
    use std::fmt::Debug;

    fn any_nested<A>(effects: &[Effect<A>], pred: &dyn Fn(&Effect<A>) -> bool) -> bool {
        effects.iter().any(|effect| {
            pred(effect)
                || match effect {
                    Effect::Cancellable { effect, .. } => any_nested(std::slice::from_ref(&**effect), pred),
                    Effect::Parallel(inner) | Effect::Sequential(inner) => any_nested(inner, pred),
                    _ => false,
                }
        })
    }

    /// Nothing to run: no effects, or a lone `Effect::None`
    ///
    /// # Panics
    ///
    /// If any effect would do something.
    pub fn assert_no_effects<A: Debug>(effects: &[Effect<A>]) {
        assert!(
            matches!(effects, [] | [Effect::None]),
            "expected no effects, got {effects:?}"
        );
    }

    /// Exactly `expected` effects
    ///
    /// # Panics
    ///
    /// On a different count.
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(effects.len(), expected, "unexpected number of effects");
    }

    /// A `Future` effect at the top level
    ///
    /// # Panics
    ///
    /// If there is none.
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "expected a Future effect"
        );
    }

    /// A `Delay`, possibly wrapped in `Cancellable` or a group
    ///
    /// # Panics
    ///
    /// If there is none.
    pub fn assert_has_delay<A>(effects: &[Effect<A>]) {
        assert!(
            any_nested(effects, &|e| matches!(e, Effect::Delay { .. })),
            "expected a Delay effect"
        );
    }

    /// A `Cancellable` registered under `id`
    ///
    /// # Panics
    ///
    /// If there is none.
    pub fn assert_has_cancellable<A>(effects: &[Effect<A>], id: &EffectId) {
        assert!(
            any_nested(effects, &|e| matches!(e, Effect::Cancellable { id: found, .. } if found == id)),
            "expected a Cancellable effect under {id}"
        );
    }

    /// A `Cancel` for `id`
    ///
    /// # Panics
    ///
    /// If there is none.
    pub fn assert_cancels<A>(effects: &[Effect<A>], id: &EffectId) {
        assert!(
            any_nested(effects, &|e| matches!(e, Effect::Cancel(found) if found == id)),
            "expected a Cancel for {id}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::assertions::*;
    use super::*;
    use boxoffice_core::effect::EffectId;
    use boxoffice_core::{smallvec, SmallVec};
    use std::time::Duration;

    /// Countdown that re-arms a one second timer until it reaches zero.
    struct Countdown;

    #[derive(Debug)]
    enum Tick {
        Tick,
        Abort,
    }

    struct Timer(EffectId);

    impl Reducer for Countdown {
        type State = u32;
        type Action = Tick;
        type Environment = Timer;

        fn reduce(&self, left: &mut u32, action: Tick, env: &Timer) -> SmallVec<[Effect<Tick>; 4]> {
            match action {
                Tick::Tick if *left > 1 => {
                    *left -= 1;
                    smallvec![Effect::Delay {
                        duration: Duration::from_secs(1),
                        action: Box::new(Tick::Tick),
                    }
                    .cancellable(env.0.clone())]
                },
                Tick::Tick => {
                    *left = 0;
                    SmallVec::new()
                },
                Tick::Abort => smallvec![Effect::Cancel(env.0.clone())],
            }
        }
    }

    fn timer() -> Timer {
        Timer(EffectId::new("countdown"))
    }

    #[test]
    fn rearms_while_time_is_left() {
        ReducerTest::new(Countdown)
            .with_env(timer())
            .given_state(3)
            .when_action(Tick::Tick)
            .then_state(|left| assert_eq!(*left, 2))
            .then_effects(|effects| {
                assert_effects_count(effects, 1);
                assert_has_delay(effects);
                assert_has_cancellable(effects, &EffectId::new("countdown"));
            })
            .run();
    }

    #[test]
    fn stops_at_zero() {
        ReducerTest::new(Countdown)
            .with_env(timer())
            .given_state(1)
            .when_action(Tick::Tick)
            .then_state(|left| assert_eq!(*left, 0))
            .then_effects(assert_no_effects)
            .run();
    }

    #[test]
    fn abort_cancels_the_timer() {
        ReducerTest::new(Countdown)
            .with_env(timer())
            .given_state(5)
            .when_action(Tick::Abort)
            .then_effects(|effects| assert_cancels(effects, &EffectId::new("countdown")))
            .run();
    }

    #[test]
    #[should_panic(expected = "needs with_env")]
    fn missing_setup_panics() {
        ReducerTest::new(Countdown).given_state(1).when_action(Tick::Tick).run();
    }
}
