//! # Ticket QR
//!
//! Rolling, time-windowed QR tokens for event tickets.
//!
//! A ticket is displayed as a token that changes every step (60 s by
//! default). Each token is an HMAC over a server-issued envelope and the
//! current step counter, signed with a short-lived session key, so a
//! screenshot stops scanning once the window moves on.
//!
//! ```text
//! {version}.{envelope}.{floor(unix / step)}.{base64url(HMAC_SHA256(key, envelope.counter))}
//! ```
//!
//! ## Components
//!
//! - [`providers::SessionProvider`]: fetches session material for a ticket
//!   ([`providers::HttpSessionProvider`] talks to the issuing server)
//! - [`reducers::GeneratorReducer`]: the state machine that signs tokens on
//!   a tick and re-bootstraps before the session expires
//! - [`RollingQr`]: the host-facing handle (`start`, `stop`, `refresh`,
//!   `current_state`)
//! - [`token`]: step counters, signing, parsing and verification
//!
//! ## Example
//!
//! ```no_run
//! use ticket_qr::{QrConfig, QrDisplay, RollingQr};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QrConfig::from_env();
//! let qr = RollingQr::from_config(&config)?;
//! qr.start("TICKET-42").await?;
//!
//! match qr.current_state().await {
//!     QrDisplay::Live { token } => println!("render {token}"),
//!     QrDisplay::Generating => println!("loading"),
//!     QrDisplay::Unavailable { diagnostic, .. } => println!("{diagnostic}"),
//! }
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod actions;
pub mod config;
pub mod environment;
pub mod error;
pub mod generator;
pub mod providers;
pub mod reducers;
pub mod state;
pub mod token;

/// Mock providers for testing
#[cfg(feature = "test-utils")]
pub mod mocks;

// Re-export main types for convenience
pub use actions::GeneratorAction;
pub use config::{GeneratorConfig, QrConfig};
pub use error::{ConfigError, GeneratorError, SessionError, SigningError};
pub use generator::RollingQr;
pub use state::{
    Generation, GeneratorPhase, GeneratorState, QrDisplay, Session, SessionGrant, TicketId,
    UnavailableKind,
};
pub use token::{ProtocolVersion, SigningKey, Token, TokenSigner, step_counter};
