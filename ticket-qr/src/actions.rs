//! Generator actions.
//!
//! Commands come from the host (`Start`, `Stop`, `Refresh`); everything else
//! is fed back by effects and carries the [`Generation`] that scheduled it.

use crate::error::SessionError;
use crate::state::{Generation, SessionGrant, TicketId};

/// Every input to the generator reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorAction {
    // ═══════════════════════════════════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════════════════════════════════
    /// Display `ticket_id`, replacing whatever was shown before.
    Start {
        /// Ticket to display
        ticket_id: TicketId,
    },

    /// Stop generating and forget the ticket.
    Stop,

    /// Bootstrap again for the current ticket, resetting the retry budget.
    Refresh,

    // ═══════════════════════════════════════════════════════════════════════
    // Effect feedback
    // ═══════════════════════════════════════════════════════════════════════
    /// The bootstrapper returned a session.
    SessionLoaded {
        /// Attempt the fetch belonged to
        generation: Generation,
        /// Session material
        grant: SessionGrant,
    },

    /// The bootstrapper failed.
    SessionFailed {
        /// Attempt the fetch belonged to
        generation: Generation,
        /// Why
        error: SessionError,
    },

    /// Periodic token recomputation.
    Tick {
        /// Session the timer was armed for
        generation: Generation,
    },

    /// One-shot expiry timer fired.
    SessionExpired {
        /// Session the timer was armed for
        generation: Generation,
    },

    /// Backoff elapsed after a failure.
    RetryBootstrap {
        /// Attempt that failed
        generation: Generation,
    },
}
