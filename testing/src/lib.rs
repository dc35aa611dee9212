//! # Rolling QR Testing
//!
//! Testing utilities for reducer-driven state machines.
//!
//! This crate provides:
//! - Clock implementations for deterministic and simulated time
//! - A Given-When-Then harness for reducers
//! - Assertion helpers for effects
//!
//! ## Example
//!
//! ```ignore
//! use rolling_qr_testing::{ReducerTest, SimulatedClock};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_expiry() {
//!     let clock = SimulatedClock::at_unix(1_747_203_300);
//!     // ... build the environment with `clock`, send actions, then
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     // clock.now() has advanced by five seconds
//! }
//! ```

use chrono::{DateTime, Utc};
use rolling_qr_core::environment::Clock;

mod reducer_test;

pub use reducer_test::{assertions, ReducerTest};

/// Clock implementations for tests
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::TimeDelta;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rolling_qr_testing::mocks::FixedClock;
    /// use rolling_qr_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// Create a fixed clock at a unix timestamp (seconds)
        #[must_use]
        pub fn at_unix(seconds: i64) -> Self {
            Self::new(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that follows tokio's (possibly paused) timer
    ///
    /// `now()` is the start time plus however much tokio time has elapsed
    /// since construction. Under `#[tokio::test(start_paused = true)]` this
    /// moves in lockstep with `Effect::Delay` timers, so wall-clock reads and
    /// scheduled timers agree.
    #[derive(Debug, Clone)]
    pub struct SimulatedClock {
        start: DateTime<Utc>,
        origin: tokio::time::Instant,
    }

    impl SimulatedClock {
        /// Start the clock at the given time
        #[must_use]
        pub fn starting_at(start: DateTime<Utc>) -> Self {
            Self {
                start,
                origin: tokio::time::Instant::now(),
            }
        }

        /// Start the clock at a unix timestamp (seconds)
        #[must_use]
        pub fn at_unix(seconds: i64) -> Self {
            Self::starting_at(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
        }
    }

    impl Clock for SimulatedClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
            self.start + elapsed
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber
    ///
    /// Honors `RUST_LOG`; safe to call from every test since only the first
    /// call installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock, SimulatedClock};
