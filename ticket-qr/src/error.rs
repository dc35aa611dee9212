//! Error types for session bootstrap, token signing and the generator.

use thiserror::Error;

/// Failure to obtain a signing session from the issuing server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The ticket identifier was empty; no request was made.
    #[error("Ticket identifier is empty")]
    EmptyTicketId,

    /// HTTP 409: the ticket is not eligible for a rolling code right now.
    #[error("Ticket is outside its dynamic window")]
    OutsideDynamicWindow,

    /// Network failure or unreadable response body.
    #[error("Session request failed: {0}")]
    FetchFailed(String),

    /// Any non-success status other than 409.
    #[error("Session request returned HTTP {status}")]
    Http {
        /// Response status code
        status: u16,
    },

    /// A success response without usable key material.
    #[error("Invalid session payload: {0}")]
    InvalidSession(String),
}

impl SessionError {
    /// Whether an automatic re-bootstrap may succeed.
    ///
    /// 409 is never retried automatically, and neither is an empty ticket
    /// identifier since the next request would be identical.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed(_) | Self::Http { .. } | Self::InvalidSession(_)
        )
    }
}

/// Failure to derive, parse or verify a token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// The session key has no bytes.
    #[error("Signing key is empty")]
    EmptyKey,

    /// The key could not be decoded from base64url.
    #[error("Signing key is not valid base64url: {0}")]
    InvalidKeyEncoding(String),

    /// The HMAC could not be keyed.
    #[error("Signing key rejected by HMAC")]
    InvalidKeyLength,

    /// The envelope is empty or contains the token separator.
    #[error("Envelope cannot be embedded in a token")]
    InvalidEnvelope,

    /// A token string does not have the `version.envelope.counter.signature` shape.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The signature does not match the key.
    #[error("Token signature does not match")]
    SignatureMismatch,
}

/// What went wrong for the generator, as shown to the display layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// The server answered 409. Retried only on ticket change or refresh.
    #[error("This ticket has no rolling code available right now")]
    SessionUnavailable,

    /// The session could not be fetched or was unusable.
    #[error("Could not load the ticket session: {0}")]
    SessionFetchFailed(SessionError),

    /// A token could not be signed with the session material.
    #[error("Could not sign the ticket code: {0}")]
    SigningFailed(SigningError),
}

impl GeneratorError {
    /// Whether the generator should schedule an automatic re-bootstrap.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::SessionUnavailable => false,
            Self::SessionFetchFailed(error) => error.is_retryable(),
            Self::SigningFailed(_) => true,
        }
    }
}

impl From<SessionError> for GeneratorError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::OutsideDynamicWindow => Self::SessionUnavailable,
            other => Self::SessionFetchFailed(other),
        }
    }
}

impl From<SigningError> for GeneratorError {
    fn from(error: SigningError) -> Self {
        Self::SigningFailed(error)
    }
}

/// Invalid configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The API base URL is empty or not an absolute http(s) URL.
    #[error("Invalid API base URL {url:?}: {reason}")]
    InvalidApiBase {
        /// Offending value
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The tick interval must be positive.
    #[error("Tick interval must be greater than zero")]
    ZeroTickInterval,

    /// The version tag is empty or contains `.`.
    #[error("Invalid protocol version tag {0:?}")]
    InvalidProtocolVersion(String),

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}
