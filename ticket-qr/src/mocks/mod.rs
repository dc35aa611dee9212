//! Mock provider implementations for testing.
//!
//! In-memory stand-ins for the issuing server, for use in unit and
//! integration tests.

pub mod session;

pub use session::MockSessionProvider;
