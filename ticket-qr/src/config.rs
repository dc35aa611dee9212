//! Configuration management for the rolling QR generator.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::ConfigError;
use crate::token::{DEFAULT_PROTOCOL_VERSION, ProtocolVersion};
use rolling_qr_runtime::RetryPolicy;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct QrConfig {
    /// Issuing server base URL (`QR_API_BASE`)
    pub api_base: String,
    /// Session fetch timeout (`QR_REQUEST_TIMEOUT_SECS`, default: 10)
    pub request_timeout: Duration,
    /// Token version tag (`QR_PROTOCOL_VERSION`, default: `v3`)
    pub protocol_version: String,
    /// Display refresh tick (`QR_TICK_INTERVAL_MS`, default: 1000)
    pub tick_interval: Duration,
    /// Automatic re-bootstrap attempts after a failure (`QR_RETRY_MAX_ATTEMPTS`, default: 5)
    pub retry_max_attempts: u32,
    /// First backoff delay (`QR_RETRY_INITIAL_DELAY_MS`, default: 1000)
    pub retry_initial_delay: Duration,
    /// Backoff cap (`QR_RETRY_MAX_DELAY_SECS`, default: 32)
    pub retry_max_delay: Duration,
}

impl QrConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to their defaults; call
    /// [`QrConfig::validate`] before use.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            api_base: lookup("QR_API_BASE").unwrap_or(defaults.api_base),
            request_timeout: number("QR_REQUEST_TIMEOUT_SECS")
                .map_or(defaults.request_timeout, Duration::from_secs),
            protocol_version: lookup("QR_PROTOCOL_VERSION").unwrap_or(defaults.protocol_version),
            tick_interval: number("QR_TICK_INTERVAL_MS")
                .map_or(defaults.tick_interval, Duration::from_millis),
            retry_max_attempts: lookup("QR_RETRY_MAX_ATTEMPTS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.retry_max_attempts),
            retry_initial_delay: number("QR_RETRY_INITIAL_DELAY_MS")
                .map_or(defaults.retry_initial_delay, Duration::from_millis),
            retry_max_delay: number("QR_RETRY_MAX_DELAY_SECS")
                .map_or(defaults.retry_max_delay, Duration::from_secs),
        }
    }

    /// Check the values that would otherwise fail at first use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty or non-http(s) base URL, a zero
    /// tick interval, or an invalid version tag.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let api_base = self.api_base.trim();
        if api_base.is_empty() {
            return Err(ConfigError::InvalidApiBase {
                url: self.api_base.clone(),
                reason: "empty".to_string(),
            });
        }
        if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
            return Err(ConfigError::InvalidApiBase {
                url: self.api_base.clone(),
                reason: "scheme must be http or https".to_string(),
            });
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        ProtocolVersion::new(self.protocol_version.clone())?;
        Ok(())
    }

    /// Retry policy built from the `QR_RETRY_*` values.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.retry_max_attempts)
            .with_initial_delay(self.retry_initial_delay)
            .with_max_delay(self.retry_max_delay)
    }

    /// Validate and derive the generator settings.
    ///
    /// # Errors
    ///
    /// See [`QrConfig::validate`].
    pub fn generator_config(&self) -> Result<GeneratorConfig, ConfigError> {
        self.validate()?;
        Ok(GeneratorConfig::default()
            .with_protocol_version(ProtocolVersion::new(self.protocol_version.clone())?)
            .with_tick_interval(self.tick_interval)
            .with_retry(self.retry_policy()))
    }
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(10),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            tick_interval: Duration::from_millis(1000),
            retry_max_attempts: 5,
            retry_initial_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_secs(32),
        }
    }
}

/// Settings the generator reducer runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Version tag prefixed to every token
    pub protocol_version: ProtocolVersion,
    /// How often the token is recomputed
    pub tick_interval: Duration,
    /// Backoff for fetch and signing failures (never used for 409)
    pub retry: RetryPolicy,
    /// Lower bound for the one-shot expiry timer
    pub min_expiry_delay: Duration,
}

impl GeneratorConfig {
    /// Set the tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the version tag.
    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::default(),
            tick_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            min_expiry_delay: Duration::from_secs(1),
        }
    }
}
