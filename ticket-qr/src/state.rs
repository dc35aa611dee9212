//! Generator state and the session material it owns.

use crate::error::{GeneratorError, SigningError};
use crate::token::{ProtocolVersion, SigningKey, TokenSigner, step_counter};
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::time::Duration;

/// Step size when the server omits `stepSeconds`.
pub const DEFAULT_STEP_SECONDS: u64 = 60;

/// Session lifetime when the server omits `sessionTtlSeconds`.
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 600;

/// Opaque ticket identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TicketId(String);

impl TicketId {
    /// Wrap an identifier. Blank identifiers are accepted here and rejected
    /// by the session provider before any request is made.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TicketId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Monotonic counter identifying one bootstrap attempt.
///
/// Timers and fetch results carry the generation that scheduled them; the
/// reducer drops anything whose generation is not the current one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// The generation after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw value (for logging).
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session material as returned by the issuing server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    /// Ticket the session was issued for
    pub ticket_id: TicketId,
    /// Opaque server string embedded in every token
    pub envelope: String,
    /// Decoded HMAC key
    pub key: SigningKey,
    /// Window length in seconds
    pub step_seconds: u64,
    /// Server clock at issue time
    pub server_now: DateTime<Utc>,
    /// Session lifetime in seconds, counted from `server_now`
    pub ttl_seconds: u64,
}

impl SessionGrant {
    /// Grant with the default step and TTL.
    #[must_use]
    pub fn new(
        ticket_id: TicketId,
        envelope: impl Into<String>,
        key: SigningKey,
        server_now: DateTime<Utc>,
    ) -> Self {
        Self {
            ticket_id,
            envelope: envelope.into(),
            key,
            step_seconds: DEFAULT_STEP_SECONDS,
            server_now,
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    /// Set the step length.
    #[must_use]
    pub fn with_step_seconds(mut self, step_seconds: u64) -> Self {
        self.step_seconds = step_seconds;
        self
    }

    /// Set the session lifetime.
    #[must_use]
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Expiry in the server's clock frame.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        self.server_now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// An active signing session, owned by the generator.
///
/// The key lives in the [`TokenSigner`] and is dropped with the session.
#[derive(Debug, Clone)]
pub struct Session {
    ticket_id: TicketId,
    envelope: String,
    signer: TokenSigner,
    step_seconds: u64,
    expires_at: DateTime<Utc>,
    clock_offset: TimeDelta,
}

impl Session {
    /// Accept a grant received at local time `received_at`.
    ///
    /// The difference between the server's `now` and `received_at` is kept so
    /// expiry can be judged in the server's frame on a skewed device.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::EmptyKey`] if the grant carries no key bytes.
    pub fn from_grant(grant: SessionGrant, received_at: DateTime<Utc>) -> Result<Self, SigningError> {
        let expires_at = grant.expires_at();
        Ok(Self {
            signer: TokenSigner::new(grant.key)?,
            ticket_id: grant.ticket_id,
            envelope: grant.envelope,
            step_seconds: grant.step_seconds.max(1),
            clock_offset: grant.server_now - received_at,
            expires_at,
        })
    }

    /// Ticket this session signs for.
    #[must_use]
    pub const fn ticket_id(&self) -> &TicketId {
        &self.ticket_id
    }

    /// Window length in seconds.
    #[must_use]
    pub const fn step_seconds(&self) -> u64 {
        self.step_seconds
    }

    /// Expiry in the server's clock frame.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Server time minus local time, measured when the session arrived.
    #[must_use]
    pub const fn clock_offset(&self) -> TimeDelta {
        self.clock_offset
    }

    /// Translate a local reading into the server's frame.
    #[must_use]
    pub fn server_time(&self, local_now: DateTime<Utc>) -> DateTime<Utc> {
        local_now
            .checked_add_signed(self.clock_offset)
            .unwrap_or(if self.clock_offset > TimeDelta::zero() {
                DateTime::<Utc>::MAX_UTC
            } else {
                DateTime::<Utc>::MIN_UTC
            })
    }

    /// Whether the session must no longer be used.
    #[must_use]
    pub fn is_expired(&self, local_now: DateTime<Utc>) -> bool {
        self.server_time(local_now) >= self.expires_at
    }

    /// Time left before expiry (zero once expired).
    #[must_use]
    pub fn time_to_expiry(&self, local_now: DateTime<Utc>) -> Duration {
        (self.expires_at - self.server_time(local_now))
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Token for the step containing `local_now`.
    ///
    /// # Errors
    ///
    /// Returns a [`SigningError`] if the envelope cannot be embedded or the
    /// key is rejected.
    pub fn token_at(
        &self,
        version: &ProtocolVersion,
        local_now: DateTime<Utc>,
    ) -> Result<String, SigningError> {
        let counter = step_counter(local_now.timestamp(), self.step_seconds);
        self.signer.sign(version, &self.envelope, counter)
    }

    /// Signer for this session's key.
    #[must_use]
    pub const fn signer(&self) -> &TokenSigner {
        &self.signer
    }
}

/// Lifecycle phase of the generator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GeneratorPhase {
    /// No ticket configured.
    #[default]
    Idle,
    /// Ticket configured, bootstrap in flight.
    NoSession,
    /// Session held, tokens rotating.
    SessionActive,
    /// Fetch or signing failed; a retry may be scheduled.
    Error(GeneratorError),
    /// The server reported the ticket outside its dynamic window.
    Unavailable,
}

/// Everything one generator instance owns.
#[derive(Debug, Clone, Default)]
pub struct GeneratorState {
    /// Ticket currently displayed
    pub ticket_id: Option<TicketId>,
    /// Current bootstrap attempt
    pub generation: Generation,
    /// Lifecycle phase
    pub phase: GeneratorPhase,
    /// Active session, present only in `SessionActive`
    pub session: Option<Session>,
    /// Latest token
    pub token: Option<String>,
    /// Automatic retries used since the last good token
    pub retry_attempts: u32,
}

impl GeneratorState {
    /// What the display layer should show.
    #[must_use]
    pub fn display(&self) -> QrDisplay {
        match &self.phase {
            GeneratorPhase::Idle | GeneratorPhase::NoSession => QrDisplay::Generating,
            GeneratorPhase::SessionActive => self
                .token
                .clone()
                .map_or(QrDisplay::Generating, |token| QrDisplay::Live { token }),
            GeneratorPhase::Error(error) => QrDisplay::Unavailable {
                kind: UnavailableKind::Error,
                diagnostic: error.to_string(),
            },
            GeneratorPhase::Unavailable => QrDisplay::Unavailable {
                kind: UnavailableKind::NotEligible,
                diagnostic: GeneratorError::SessionUnavailable.to_string(),
            },
        }
    }
}

/// Why no code is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableKind {
    /// Outside the ticket's dynamic window.
    NotEligible,
    /// Fetch or signing failure.
    Error,
}

/// Read-only view for the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrDisplay {
    /// No token yet and no error.
    Generating,
    /// Render this token.
    Live {
        /// Current token string
        token: String,
    },
    /// Nothing to render.
    Unavailable {
        /// Category
        kind: UnavailableKind,
        /// Human-readable explanation
        diagnostic: String,
    },
}

impl QrDisplay {
    /// The token, if one should be rendered.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Live { token } => Some(token),
            _ => None,
        }
    }

    /// Human-readable diagnostic, if any.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Unavailable { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}
