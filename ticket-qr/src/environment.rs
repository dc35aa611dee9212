//! Generator environment.
//!
//! This module defines the environment type for dependency injection
//! in the generator reducer.

use crate::providers::SessionProvider;
use rolling_qr_core::environment::Clock;

/// Generator environment.
///
/// # Type Parameters
///
/// - `P`: Session provider
/// - `C`: Clock
#[derive(Debug, Clone)]
pub struct GeneratorEnvironment<P, C>
where
    P: SessionProvider + Clone,
    C: Clock,
{
    /// Session provider (issuing server).
    pub provider: P,

    /// Wall clock, used for step counters and expiry.
    pub clock: C,
}

impl<P, C> GeneratorEnvironment<P, C>
where
    P: SessionProvider + Clone,
    C: Clock,
{
    /// Create a new generator environment.
    #[must_use]
    pub const fn new(provider: P, clock: C) -> Self {
        Self { provider, clock }
    }
}
