//! Session provider trait and the HTTP implementation.

pub mod http;

pub use http::HttpSessionProvider;

use crate::error::SessionError;
use crate::state::{SessionGrant, TicketId};

/// Source of signing sessions.
///
/// This trait abstracts over the issuing server.
///
/// # Implementation Notes
///
/// - No caching: every call asks for a fresh session
/// - Blank ticket identifiers fail with [`SessionError::EmptyTicketId`]
///   without any I/O
/// - A 409 from the server maps to [`SessionError::OutsideDynamicWindow`]
pub trait SessionProvider: Send + Sync {
    /// Fetch a session for `ticket_id`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The ticket identifier is blank
    /// - The ticket is outside its dynamic window (409)
    /// - Network request fails or the status is not a success
    /// - The payload lacks a usable key or envelope
    fn fetch_session(
        &self,
        ticket_id: &TicketId,
    ) -> impl std::future::Future<Output = Result<SessionGrant, SessionError>> + Send;
}
