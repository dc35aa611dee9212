//! Rolling token generator reducer.
//!
//! # Flow
//!
//! 1. `Start` records the ticket, cancels everything and fetches a session
//! 2. `SessionLoaded` computes the first token, arms the tick and expiry timers
//! 3. `Tick` recomputes the token; it only changes when the step does
//! 4. Expiry (timer or a tick past `expires_at`) discards the session and
//!    bootstraps again
//! 5. Failures discard the session and retry with backoff, except 409
//!
//! Every bootstrap bumps the [`Generation`]. Fetch results and timers carry
//! the generation that scheduled them and are dropped when it is not current,
//! so a late response for a previous ticket never reaches the display.

use crate::actions::GeneratorAction;
use crate::config::GeneratorConfig;
use crate::environment::GeneratorEnvironment;
use crate::error::{GeneratorError, SessionError};
use crate::providers::SessionProvider;
use crate::state::{Generation, GeneratorPhase, GeneratorState, Session, SessionGrant};
use rolling_qr_core::effect::{Effect, EffectId};
use rolling_qr_core::environment::Clock;
use rolling_qr_core::reducer::Reducer;
use rolling_qr_core::{SmallVec, async_effect, cancellable_delay, smallvec};

/// Repeating token recomputation.
pub const TICK_TIMER: EffectId = EffectId::from_static("qr.tick");

/// One-shot session expiry.
pub const EXPIRY_TIMER: EffectId = EffectId::from_static("qr.expiry");

/// In-flight session fetch.
pub const BOOTSTRAP: EffectId = EffectId::from_static("qr.bootstrap");

/// Pending backoff before the next fetch.
pub const RETRY_TIMER: EffectId = EffectId::from_static("qr.retry");

type Effects = SmallVec<[Effect<GeneratorAction>; 4]>;

/// Rolling token generator reducer.
#[derive(Debug, Clone)]
pub struct GeneratorReducer<P, C> {
    config: GeneratorConfig,
    /// Phantom data to hold type parameters.
    _phantom: std::marker::PhantomData<(P, C)>,
}

impl<P, C> GeneratorReducer<P, C> {
    /// Create a reducer with the given settings.
    #[must_use]
    pub const fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

impl<P, C> Default for GeneratorReducer<P, C> {
    fn default() -> Self {
        Self::new(GeneratorConfig::default())
    }
}

fn cancel_all() -> Effect<GeneratorAction> {
    Effect::merge(vec![
        Effect::Cancel(TICK_TIMER),
        Effect::Cancel(EXPIRY_TIMER),
        Effect::Cancel(BOOTSTRAP),
        Effect::Cancel(RETRY_TIMER),
    ])
}

impl<P, C> GeneratorReducer<P, C>
where
    P: SessionProvider + Clone + 'static,
    C: Clock,
{
    /// Drop the current session and fetch a new one for the current ticket.
    fn bootstrap(&self, state: &mut GeneratorState, env: &GeneratorEnvironment<P, C>) -> Effects {
        let Some(ticket_id) = state.ticket_id.clone() else {
            return smallvec![Effect::None];
        };

        state.generation = state.generation.next();
        state.phase = GeneratorPhase::NoSession;
        state.session = None;
        state.token = None;

        let generation = state.generation;
        tracing::debug!(%ticket_id, %generation, "Bootstrapping QR session");

        let provider = env.provider.clone();
        smallvec![
            cancel_all(),
            async_effect! {
                Some(match provider.fetch_session(&ticket_id).await {
                    Ok(grant) => GeneratorAction::SessionLoaded { generation, grant },
                    Err(error) => GeneratorAction::SessionFailed { generation, error },
                })
            }
            .cancellable(BOOTSTRAP),
        ]
    }

    fn activate(
        &self,
        state: &mut GeneratorState,
        grant: SessionGrant,
        env: &GeneratorEnvironment<P, C>,
    ) -> Effects {
        let now = env.clock.now();
        let session = match Session::from_grant(grant, now) {
            Ok(session) => session,
            Err(error) => return self.fail(state, error.into()),
        };
        if session.is_expired(now) {
            return self.fail(
                state,
                SessionError::InvalidSession("session already expired".to_string()).into(),
            );
        }
        let token = match session.token_at(&self.config.protocol_version, now) {
            Ok(token) => token,
            Err(error) => return self.fail(state, error.into()),
        };

        let expires_in = session
            .time_to_expiry(now)
            .max(self.config.min_expiry_delay);
        tracing::info!(
            ticket_id = %session.ticket_id(),
            generation = %state.generation,
            step_seconds = session.step_seconds(),
            expires_at = %session.expires_at(),
            clock_offset_secs = session.clock_offset().num_seconds(),
            "QR session active"
        );

        state.session = Some(session);
        state.token = Some(token);
        state.phase = GeneratorPhase::SessionActive;
        state.retry_attempts = 0;

        let generation = state.generation;
        smallvec![
            self.tick_timer(generation),
            cancellable_delay! {
                id: EXPIRY_TIMER,
                duration: expires_in,
                action: GeneratorAction::SessionExpired { generation }
            },
        ]
    }

    fn tick(&self, state: &mut GeneratorState, env: &GeneratorEnvironment<P, C>) -> Effects {
        let now = env.clock.now();
        let signed = match &state.session {
            None => return smallvec![Effect::None],
            Some(session) if session.is_expired(now) => None,
            Some(session) => Some(session.token_at(&self.config.protocol_version, now)),
        };

        match signed {
            None => {
                tracing::info!(generation = %state.generation, "QR session reached expiry");
                self.bootstrap(state, env)
            },
            Some(Ok(token)) => {
                if state.token.as_deref() != Some(token.as_str()) {
                    tracing::debug!(generation = %state.generation, "QR token rotated");
                    state.token = Some(token);
                }
                smallvec![self.tick_timer(state.generation)]
            },
            Some(Err(error)) => self.fail(state, error.into()),
        }
    }

    /// Discard the session and, if allowed, schedule a re-bootstrap.
    fn fail(&self, state: &mut GeneratorState, error: GeneratorError) -> Effects {
        state.session = None;
        state.token = None;

        let generation = state.generation;
        let retry = if error.is_retryable() && self.config.retry.should_retry(state.retry_attempts) {
            let delay = self.config.retry.delay_for_attempt(state.retry_attempts);
            state.retry_attempts += 1;
            tracing::warn!(
                %error,
                attempt = state.retry_attempts,
                ?delay,
                "QR generator failed, scheduling retry"
            );
            Some(cancellable_delay! {
                id: RETRY_TIMER,
                duration: delay,
                action: GeneratorAction::RetryBootstrap { generation }
            })
        } else {
            tracing::warn!(%error, attempts = state.retry_attempts, "QR generator failed, not retrying");
            None
        };

        state.phase = match error {
            GeneratorError::SessionUnavailable => GeneratorPhase::Unavailable,
            other => GeneratorPhase::Error(other),
        };

        let mut effects: Effects = smallvec![cancel_all()];
        effects.extend(retry);
        effects
    }

    fn tick_timer(&self, generation: Generation) -> Effect<GeneratorAction> {
        cancellable_delay! {
            id: TICK_TIMER,
            duration: self.config.tick_interval,
            action: GeneratorAction::Tick { generation }
        }
    }
}

impl<P, C> Reducer for GeneratorReducer<P, C>
where
    P: SessionProvider + Clone + 'static,
    C: Clock,
{
    type State = GeneratorState;
    type Action = GeneratorAction;
    type Environment = GeneratorEnvironment<P, C>;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            GeneratorAction::Start { ticket_id } => {
                tracing::info!(%ticket_id, "Starting rolling QR");
                state.ticket_id = Some(ticket_id);
                state.retry_attempts = 0;
                self.bootstrap(state, env)
            },

            GeneratorAction::Stop => {
                tracing::info!("Stopping rolling QR");
                state.generation = state.generation.next();
                state.ticket_id = None;
                state.session = None;
                state.token = None;
                state.retry_attempts = 0;
                state.phase = GeneratorPhase::Idle;
                smallvec![cancel_all()]
            },

            GeneratorAction::Refresh => {
                if state.ticket_id.is_none() {
                    return smallvec![Effect::None];
                }
                state.retry_attempts = 0;
                self.bootstrap(state, env)
            },

            GeneratorAction::SessionLoaded { generation, grant } => {
                if generation != state.generation || state.phase != GeneratorPhase::NoSession {
                    tracing::warn!(
                        %generation,
                        current = %state.generation,
                        "Ignoring stale session response"
                    );
                    return smallvec![Effect::None];
                }
                self.activate(state, grant, env)
            },

            GeneratorAction::SessionFailed { generation, error } => {
                if generation != state.generation || state.phase != GeneratorPhase::NoSession {
                    tracing::warn!(
                        %generation,
                        current = %state.generation,
                        %error,
                        "Ignoring stale session failure"
                    );
                    return smallvec![Effect::None];
                }
                self.fail(state, error.into())
            },

            GeneratorAction::Tick { generation } => {
                if generation != state.generation {
                    tracing::trace!(%generation, "Ignoring stale tick");
                    return smallvec![Effect::None];
                }
                self.tick(state, env)
            },

            GeneratorAction::SessionExpired { generation } => {
                if generation != state.generation || state.session.is_none() {
                    tracing::trace!(%generation, "Ignoring stale expiry");
                    return smallvec![Effect::None];
                }
                tracing::info!(%generation, "QR session expired");
                self.bootstrap(state, env)
            },

            GeneratorAction::RetryBootstrap { generation } => {
                if generation != state.generation || !matches!(state.phase, GeneratorPhase::Error(_)) {
                    tracing::trace!(%generation, "Ignoring stale retry");
                    return smallvec![Effect::None];
                }
                self.bootstrap(state, env)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::SigningError;
    use crate::mocks::MockSessionProvider;
    use crate::state::{QrDisplay, TicketId, UnavailableKind};
    use crate::token::{ProtocolVersion, SigningKey};
    use std::time::Duration;
    use rolling_qr_runtime::RetryPolicy;
    use rolling_qr_testing::{FixedClock, ReducerTest, assertions};

    const NOW: i64 = 1_747_203_300;

    type TestReducer = GeneratorReducer<MockSessionProvider, FixedClock>;

    fn env() -> GeneratorEnvironment<MockSessionProvider, FixedClock> {
        GeneratorEnvironment::new(MockSessionProvider::new(), FixedClock::at_unix(NOW))
    }

    fn reducer() -> TestReducer {
        GeneratorReducer::new(GeneratorConfig::default().with_retry(RetryPolicy::new().without_jitter()))
    }

    fn grant(ticket: &str, envelope: &str) -> SessionGrant {
        SessionGrant::new(
            TicketId::new(ticket),
            envelope,
            SigningKey::from_bytes([0_u8; 32]),
            FixedClock::at_unix(NOW).now(),
        )
    }

    fn start(ticket: &str) -> GeneratorAction {
        GeneratorAction::Start {
            ticket_id: TicketId::new(ticket),
        }
    }

    fn first() -> Generation {
        Generation::default().next()
    }

    #[test]
    fn test_start_bootstraps() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .then_state(|state| {
                assert_eq!(state.ticket_id, Some(TicketId::new("T-1")));
                assert_eq!(state.phase, GeneratorPhase::NoSession);
                assert_eq!(state.generation, first());
                assert_eq!(state.display(), QrDisplay::Generating);
            })
            .then_effects(|effects| {
                assertions::assert_cancels(effects, &TICK_TIMER);
                assertions::assert_cancels(effects, &EXPIRY_TIMER);
                assertions::assert_registers(effects, &BOOTSTRAP);
                assertions::assert_has_future_effect(effects);
                assertions::assert_no_delay_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_session_loaded_activates_and_arms_timers() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("T-1", "abc123"),
            })
            .then_state(|state| {
                assert_eq!(state.phase, GeneratorPhase::SessionActive);
                assert_eq!(
                    state.display().token(),
                    Some("v3.abc123.29120055.f6lo9Q_2NdGhyMa6fpMmaVe387gtqy6mJrhK2imhaOA")
                );
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
                assertions::assert_registers(effects, &TICK_TIMER);
                assertions::assert_registers(effects, &EXPIRY_TIMER);
            })
            .run();
    }

    #[test]
    fn test_stale_response_after_ticket_switch_is_ignored() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("OLD"))
            .when_action(start("NEW"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("OLD", "old-envelope"),
            })
            .then_state(|state| {
                assert_eq!(state.ticket_id, Some(TicketId::new("NEW")));
                assert_eq!(state.phase, GeneratorPhase::NoSession);
                assert!(state.session.is_none());
                assert!(state.token.is_none());
            })
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_conflict_makes_ticket_unavailable_without_retry() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionFailed {
                generation: first(),
                error: SessionError::OutsideDynamicWindow,
            })
            .then_state(|state| {
                assert_eq!(state.phase, GeneratorPhase::Unavailable);
                assert!(matches!(
                    state.display(),
                    QrDisplay::Unavailable { kind: UnavailableKind::NotEligible, .. }
                ));
            })
            .then_effects(|effects| {
                assertions::assert_cancels(effects, &RETRY_TIMER);
                assertions::assert_no_delay_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_fetch_failure_schedules_retry() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionFailed {
                generation: first(),
                error: SessionError::Http { status: 503 },
            })
            .then_state(|state| {
                assert_eq!(
                    state.phase,
                    GeneratorPhase::Error(GeneratorError::SessionFetchFailed(SessionError::Http {
                        status: 503
                    }))
                );
                assert_eq!(state.retry_attempts, 1);
                assert!(matches!(
                    state.display(),
                    QrDisplay::Unavailable { kind: UnavailableKind::Error, .. }
                ));
            })
            .then_effects(|effects| {
                assertions::assert_registers(effects, &RETRY_TIMER);
                assertions::assert_has_delay_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_no_retry_when_budget_exhausted() {
        ReducerTest::new(TestReducer::new(
            GeneratorConfig::default().with_retry(RetryPolicy::disabled()),
        ))
        .with_env(env())
        .given_state(GeneratorState::default())
        .when_action(start("T-1"))
        .when_action(GeneratorAction::SessionFailed {
            generation: first(),
            error: SessionError::FetchFailed("connection refused".to_string()),
        })
        .then_state(|state| {
            assert_eq!(state.retry_attempts, 0);
            assert!(matches!(state.phase, GeneratorPhase::Error(_)));
        })
        .then_effects(|effects| {
            assertions::assert_no_delay_effect(effects);
        })
        .run();
    }

    #[test]
    fn test_signing_failure_discards_session() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("T-1", "has.dot"),
            })
            .then_state(|state| {
                assert_eq!(
                    state.phase,
                    GeneratorPhase::Error(GeneratorError::SigningFailed(SigningError::InvalidEnvelope))
                );
                assert!(state.session.is_none());
                assert!(state.token.is_none());
            })
            .then_effects(|effects| {
                assertions::assert_registers(effects, &RETRY_TIMER);
            })
            .run();
    }

    #[test]
    fn test_already_expired_grant_is_rejected() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("T-1", "abc123").with_ttl_seconds(0),
            })
            .then_state(|state| {
                assert!(matches!(
                    state.phase,
                    GeneratorPhase::Error(GeneratorError::SessionFetchFailed(
                        SessionError::InvalidSession(_)
                    ))
                ));
            })
            .run();
    }

    #[test]
    fn test_retry_rebootstraps_with_new_generation() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionFailed {
                generation: first(),
                error: SessionError::Http { status: 500 },
            })
            .when_action(GeneratorAction::RetryBootstrap { generation: first() })
            .then_state(|state| {
                assert_eq!(state.generation, first().next());
                assert_eq!(state.phase, GeneratorPhase::NoSession);
                assert_eq!(state.retry_attempts, 1);
            })
            .then_effects(|effects| {
                assertions::assert_registers(effects, &BOOTSTRAP);
            })
            .run();
    }

    #[test]
    fn test_tick_keeps_token_and_rearms() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("T-1", "abc123"),
            })
            .when_action(GeneratorAction::Tick { generation: first() })
            .then_state(|state| {
                assert_eq!(state.phase, GeneratorPhase::SessionActive);
                assert!(state.token.as_deref().unwrap().starts_with("v3.abc123.29120055."));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_registers(effects, &TICK_TIMER);
            })
            .run();
    }

    #[test]
    fn test_stale_timers_are_ignored() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("T-1", "abc123"),
            })
            .when_action(GeneratorAction::SessionExpired {
                generation: Generation::default(),
            })
            .then_state(|state| {
                assert_eq!(state.phase, GeneratorPhase::SessionActive);
                assert_eq!(state.generation, first());
            })
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_expiry_rebootstraps_once() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("T-1", "abc123"),
            })
            .when_action(GeneratorAction::SessionExpired { generation: first() })
            // The tick armed for the same session is now stale.
            .when_action(GeneratorAction::Tick { generation: first() })
            .then_state(|state| {
                assert_eq!(state.generation, first().next());
                assert_eq!(state.phase, GeneratorPhase::NoSession);
                assert!(state.session.is_none());
            })
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_stop_clears_everything() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("T-1", "abc123"),
            })
            .when_action(GeneratorAction::Stop)
            .then_state(|state| {
                assert_eq!(state.phase, GeneratorPhase::Idle);
                assert!(state.ticket_id.is_none());
                assert!(state.session.is_none());
                assert!(state.token.is_none());
            })
            .then_effects(|effects| {
                assertions::assert_cancels(effects, &TICK_TIMER);
                assertions::assert_cancels(effects, &EXPIRY_TIMER);
                assertions::assert_cancels(effects, &BOOTSTRAP);
                assertions::assert_cancels(effects, &RETRY_TIMER);
            })
            .run();
    }

    #[test]
    fn test_configured_version_and_tick_interval() {
        let config = GeneratorConfig::default()
            .with_protocol_version(ProtocolVersion::new("v4").unwrap())
            .with_tick_interval(Duration::from_millis(250));

        ReducerTest::new(TestReducer::new(config))
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionLoaded {
                generation: first(),
                grant: grant("T-1", "abc123"),
            })
            .then_state(|state| {
                assert!(state.token.as_deref().unwrap().starts_with("v4.abc123.29120055."));
            })
            .then_effects(|effects| {
                assert!(effects.iter().any(|effect| matches!(
                    effect,
                    Effect::Cancellable { id, effect }
                        if *id == TICK_TIMER
                            && matches!(
                                effect.as_ref(),
                                Effect::Delay { duration, .. } if *duration == Duration::from_millis(250)
                            )
                )));
            })
            .run();
    }

    #[test]
    fn test_refresh_without_ticket_is_noop() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(GeneratorAction::Refresh)
            .then_state(|state| {
                assert_eq!(state.phase, GeneratorPhase::Idle);
                assert_eq!(state.generation, Generation::default());
            })
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_refresh_leaves_unavailable() {
        ReducerTest::new(reducer())
            .with_env(env())
            .given_state(GeneratorState::default())
            .when_action(start("T-1"))
            .when_action(GeneratorAction::SessionFailed {
                generation: first(),
                error: SessionError::OutsideDynamicWindow,
            })
            .when_action(GeneratorAction::Refresh)
            .then_state(|state| {
                assert_eq!(state.phase, GeneratorPhase::NoSession);
                assert_eq!(state.generation, first().next());
            })
            .then_effects(|effects| {
                assertions::assert_registers(effects, &BOOTSTRAP);
            })
            .run();
    }
}
