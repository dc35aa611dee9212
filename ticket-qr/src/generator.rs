//! Host-facing handle for one displayed ticket.

use crate::actions::GeneratorAction;
use crate::config::{GeneratorConfig, QrConfig};
use crate::environment::GeneratorEnvironment;
use crate::error::ConfigError;
use crate::providers::{HttpSessionProvider, SessionProvider};
use crate::reducers::GeneratorReducer;
use crate::state::{GeneratorPhase, GeneratorState, QrDisplay, TicketId};
use rolling_qr_core::environment::{Clock, SystemClock};
use rolling_qr_runtime::{Store, StoreError};
use std::time::Duration;

/// Store type driving one generator.
pub type GeneratorStore<P, C> =
    Store<GeneratorState, GeneratorAction, GeneratorEnvironment<P, C>, GeneratorReducer<P, C>>;

/// Rolling QR generator for one ticket display.
///
/// Owns the store, and with it every timer and in-flight fetch. Dropping the
/// handle cancels all of them.
///
/// # Example
///
/// ```no_run
/// use ticket_qr::{QrConfig, RollingQr};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let qr = RollingQr::from_config(&QrConfig::from_env())?;
/// qr.start("TICKET-42").await?;
///
/// if let Some(token) = qr.current_state().await.token() {
///     println!("render {token}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct RollingQr<P, C>
where
    P: SessionProvider + Clone + 'static,
    C: Clock + 'static,
{
    store: GeneratorStore<P, C>,
}

impl RollingQr<HttpSessionProvider, SystemClock> {
    /// Generator talking to the configured issuing server.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration does not validate or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &QrConfig) -> Result<Self, ConfigError> {
        let generator = config.generator_config()?;
        let provider = HttpSessionProvider::from_config(config)?;
        Ok(Self::new(provider, SystemClock, generator))
    }
}

impl<P, C> RollingQr<P, C>
where
    P: SessionProvider + Clone + 'static,
    C: Clock + 'static,
{
    /// Create an idle generator.
    #[must_use]
    pub fn new(provider: P, clock: C, config: GeneratorConfig) -> Self {
        Self {
            store: Store::new(
                GeneratorState::default(),
                GeneratorReducer::new(config),
                GeneratorEnvironment::new(provider, clock),
            ),
        }
    }

    /// Show `ticket_id`, replacing any previous ticket.
    ///
    /// Timers for the previous ticket are cancelled before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`RollingQr::shutdown`].
    pub async fn start(&self, ticket_id: impl Into<TicketId>) -> Result<(), StoreError> {
        self.store
            .send(GeneratorAction::Start {
                ticket_id: ticket_id.into(),
            })
            .await
    }

    /// Stop generating and cancel all timers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`RollingQr::shutdown`].
    pub async fn stop(&self) -> Result<(), StoreError> {
        self.store.send(GeneratorAction::Stop).await
    }

    /// Bootstrap again for the current ticket.
    ///
    /// This is the way out of `Unavailable` and of exhausted retries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`RollingQr::shutdown`].
    pub async fn refresh(&self) -> Result<(), StoreError> {
        self.store.send(GeneratorAction::Refresh).await
    }

    /// What the display should show right now.
    pub async fn current_state(&self) -> QrDisplay {
        self.store.state(GeneratorState::display).await
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> GeneratorPhase {
        self.store.state(|s| s.phase.clone()).await
    }

    /// The underlying store (timer inspection in tests).
    #[must_use]
    pub const fn store(&self) -> &GeneratorStore<P, C> {
        &self.store
    }

    /// Stop accepting commands, cancel all timers and wait for in-flight work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if work is still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.store.shutdown(timeout).await
    }
}

impl<P, C> Drop for RollingQr<P, C>
where
    P: SessionProvider + Clone + 'static,
    C: Clock + 'static,
{
    fn drop(&mut self) {
        self.store.cancel_all();
    }
}
