//! Freobus Configuration
//!
//! Configuration for the session coordination layer. Every field has a serde
//! default so a partial TOML file (or none at all) yields a working setup.
//!
//! ```toml
//! [channel]
//! name = "freobus_session_channel"
//!
//! [session]
//! max_concurrent_sessions = 5
//! max_inactivity_time_ms = 1800000
//!
//! [recovery.strategies.session]
//! max_retries = 3
//! backoff_multiplier = 1.5
//! initial_delay_ms = 1000
//! max_delay_ms = 10000
//! ```

use crate::errors::{FreobusError, FreobusResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Name of the shared cross-context channel
pub const DEFAULT_CHANNEL_NAME: &str = "freobus_session_channel";

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreobusConfig {
    /// Cross-context broadcast channel
    pub channel: ChannelConfig,
    /// Session manager behaviour
    pub session: SessionConfig,
    /// Nonce ledger behaviour
    pub nonce: NonceConfig,
    /// Error recovery strategies
    pub recovery: RecoveryConfig,
}

impl FreobusConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> FreobusResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| FreobusError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file and validate it
    pub fn load(path: impl AsRef<Path>) -> FreobusResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FreobusError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> FreobusResult<String> {
        toml::to_string_pretty(self).map_err(|e| FreobusError::config(e.to_string()))
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> FreobusResult<()> {
        if self.channel.name.trim().is_empty() {
            return Err(FreobusError::config("channel.name must not be empty"));
        }
        self.session.validate()?;
        self.nonce.validate()?;
        for (category, strategy) in self.recovery.effective_strategies() {
            strategy
                .validate()
                .map_err(|e| FreobusError::config(format!("recovery.strategies.{category}: {e}")))?;
        }
        Ok(())
    }
}

/// Cross-context channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Channel name shared by all contexts of the platform
    pub name: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CHANNEL_NAME.to_string(),
        }
    }
}

/// Session manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on a session's lifetime from registration or refresh
    pub max_session_duration_ms: u64,
    /// Silence after which the active session is terminated
    pub max_inactivity_time_ms: u64,
    /// Period of the refresh task when `auto_refresh` is enabled
    pub refresh_interval_ms: u64,
    /// Maximum number of origins attached to the active session
    pub max_concurrent_sessions: usize,
    /// Period of the inactivity monitor
    pub activity_check_interval_ms: u64,
    /// Extend the active session's expiry while it sees activity
    pub auto_refresh: bool,
    /// Buffered local events per subscriber
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_session_duration_ms: 24 * HOUR_MS,
            max_inactivity_time_ms: 30 * MINUTE_MS,
            refresh_interval_ms: 5 * MINUTE_MS,
            max_concurrent_sessions: 5,
            activity_check_interval_ms: MINUTE_MS,
            auto_refresh: false,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Maximum session lifetime
    pub fn max_session_duration(&self) -> Duration {
        Duration::from_millis(self.max_session_duration_ms)
    }

    /// Maximum inactivity before termination
    pub fn max_inactivity_time(&self) -> Duration {
        Duration::from_millis(self.max_inactivity_time_ms)
    }

    /// Refresh task period
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Inactivity monitor period
    pub fn activity_check_interval(&self) -> Duration {
        Duration::from_millis(self.activity_check_interval_ms)
    }

    /// Reject values the background tasks cannot run with
    pub fn validate(&self) -> FreobusResult<()> {
        let positive = [
            ("max_session_duration_ms", self.max_session_duration_ms),
            ("max_inactivity_time_ms", self.max_inactivity_time_ms),
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("activity_check_interval_ms", self.activity_check_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(FreobusError::config(format!("session.{field} must be > 0")));
            }
        }
        if self.max_concurrent_sessions == 0 {
            return Err(FreobusError::config(
                "session.max_concurrent_sessions must be > 0",
            ));
        }
        if self.event_capacity == 0 {
            return Err(FreobusError::config("session.event_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Nonce ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// How long a used nonce is remembered
    pub window_ms: u64,
    /// Period of the sweep that forgets expired nonces
    pub sweep_interval_ms: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            window_ms: 5 * MINUTE_MS,
            sweep_interval_ms: MINUTE_MS,
        }
    }
}

impl NonceConfig {
    /// Nonce retention window
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Sweep period
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Reject a zero window or sweep period
    pub fn validate(&self) -> FreobusResult<()> {
        if self.window_ms == 0 {
            return Err(FreobusError::config("nonce.window_ms must be > 0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(FreobusError::config("nonce.sweep_interval_ms must be > 0"));
        }
        Ok(())
    }
}

/// Retry policy for one error category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    /// Recovery attempts before giving up
    pub max_retries: u32,
    /// Growth factor applied per failed attempt
    pub backoff_multiplier: f64,
    /// Delay before the first attempt
    pub initial_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
}

impl RecoveryStrategy {
    /// Built-in policy for session errors
    pub const fn session_default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 1.5,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }

    /// Built-in policy for network errors
    pub const fn network_default() -> Self {
        Self {
            max_retries: 5,
            backoff_multiplier: 2.0,
            initial_delay_ms: 500,
            max_delay_ms: 15_000,
        }
    }

    /// Built-in policy for wallet errors
    pub const fn wallet_default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 1.5,
            initial_delay_ms: 2_000,
            max_delay_ms: 20_000,
        }
    }

    /// Delay before the attempt following `retry_count` failures:
    /// `min(initial * multiplier^retry_count, max)`.
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Check the policy is usable
    pub fn validate(&self) -> FreobusResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(FreobusError::config(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(FreobusError::config(format!(
                "initial_delay_ms ({}) exceeds max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Error recovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Per-category overrides, merged over the built-in strategies
    pub strategies: BTreeMap<String, RecoveryStrategy>,
    /// Pause before probing connectivity in the network recovery action
    pub network_settle_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            strategies: BTreeMap::new(),
            network_settle_ms: 1_000,
        }
    }
}

impl RecoveryConfig {
    /// Built-in strategies keyed by category
    pub fn default_strategies() -> BTreeMap<String, RecoveryStrategy> {
        BTreeMap::from([
            ("session".to_string(), RecoveryStrategy::session_default()),
            ("network".to_string(), RecoveryStrategy::network_default()),
            ("wallet".to_string(), RecoveryStrategy::wallet_default()),
        ])
    }

    /// Built-in strategies with configured overrides applied
    pub fn effective_strategies(&self) -> BTreeMap<String, RecoveryStrategy> {
        let mut strategies = Self::default_strategies();
        strategies.extend(self.strategies.iter().map(|(k, v)| (k.clone(), *v)));
        strategies
    }

    /// Settle delay for the network recovery action
    pub fn network_settle(&self) -> Duration {
        Duration::from_millis(self.network_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FreobusConfig::default();
        assert_eq!(config.channel.name, "freobus_session_channel");
        assert_eq!(config.session.max_session_duration(), Duration::from_secs(24 * 3600));
        assert_eq!(config.session.max_inactivity_time(), Duration::from_secs(30 * 60));
        assert_eq!(config.session.refresh_interval(), Duration::from_secs(5 * 60));
        assert_eq!(config.session.max_concurrent_sessions, 5);
        assert_eq!(config.nonce.window(), Duration::from_secs(5 * 60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = FreobusConfig::from_toml_str(
            r#"
            [session]
            max_concurrent_sessions = 1

            [recovery.strategies.session]
            max_retries = 1
            backoff_multiplier = 1.0
            initial_delay_ms = 10
            max_delay_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.session.max_concurrent_sessions, 1);
        assert_eq!(config.session.max_inactivity_time_ms, 30 * 60 * 1000);

        let strategies = config.recovery.effective_strategies();
        assert_eq!(strategies["session"].max_retries, 1);
        assert_eq!(strategies["network"], RecoveryStrategy::network_default());
        assert_eq!(strategies["wallet"], RecoveryStrategy::wallet_default());
    }

    #[test]
    fn toml_round_trip_preserves_config() {
        let mut config = FreobusConfig::default();
        config.session.auto_refresh = true;
        config
            .recovery
            .strategies
            .insert("custom".into(), RecoveryStrategy::network_default());

        let text = config.to_toml_string().unwrap();
        assert_eq!(FreobusConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_matches!(
            FreobusConfig::from_toml_str("[session]\nmax_concurrent_sessions = 0"),
            Err(FreobusError::Config { .. })
        );
        assert_matches!(
            FreobusConfig::from_toml_str("[nonce]\nwindow_ms = 0"),
            Err(FreobusError::Config { .. })
        );
        assert_matches!(
            FreobusConfig::from_toml_str(
                "[recovery.strategies.x]\nmax_retries = 1\nbackoff_multiplier = 0.5\ninitial_delay_ms = 1\nmax_delay_ms = 2"
            ),
            Err(FreobusError::Config { .. })
        );
        assert_matches!(
            FreobusConfig::from_toml_str("[session]\nmax_concurrent_sessions = \"five\""),
            Err(FreobusError::Config { .. })
        );
    }

    #[test]
    fn session_backoff_schedule() {
        let strategy = RecoveryStrategy::session_default();
        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(1_000));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(1_500));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(2_250));
        assert_eq!(strategy.delay_for_attempt(20), Duration::from_millis(10_000));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_capped(
            initial in 1u64..5_000,
            extra in 0u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..40,
        ) {
            let strategy = RecoveryStrategy {
                max_retries: 10,
                backoff_multiplier: multiplier,
                initial_delay_ms: initial,
                max_delay_ms: initial + extra,
            };
            let current = strategy.delay_for_attempt(attempt);
            let next = strategy.delay_for_attempt(attempt + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= Duration::from_millis(strategy.max_delay_ms));
            prop_assert!(strategy.delay_for_attempt(0) >= Duration::from_millis(initial.min(strategy.max_delay_ms)));
        }
    }
}
