//! Liveness thresholds and timer cadences.
//!
//! Every value is tunable. The defaults are empirical product choices, not
//! derived invariants, so nothing downstream hard-codes them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("{lower} ({lower_ms}ms) must be below {upper} ({upper_ms}ms)")]
    InvertedThresholds {
        lower: &'static str,
        lower_ms: u64,
        upper: &'static str,
        upper_ms: u64,
    },

    #[error("reconnect_multiplier must be a finite value >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunable configuration for the liveness core. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Timeout applied to every health probe (default 5s).
    pub probe_timeout_ms: u64,
    /// Standalone periodic probe cadence (default 60s).
    pub probe_interval_ms: u64,
    /// Delay before re-acquiring a revoked wake lock (default 1s).
    pub wake_lock_reacquire_delay_ms: u64,
    /// Delay before the first validation after startup (default 3s).
    pub validator_startup_delay_ms: u64,
    /// Periodic subscription validation cadence (default 2min).
    pub validator_interval_ms: u64,
    /// Delay before validating after a visibility restore (default 1s).
    pub validator_visible_delay_ms: u64,
    /// Focus after at least this much inactivity triggers validation (default 60s).
    pub focus_inactivity_ms: u64,
    /// Dormancy below this is trivial: probe only (default 30s).
    pub trivial_dormancy_ms: u64,
    /// Dormancy at or above this escalates to full recovery (default 5min).
    pub emergency_dormancy_ms: u64,
    /// Ping cadence towards the background worker (default 10s).
    pub heartbeat_interval_ms: u64,
    /// Silence after which the worker is presumed dead (default 30s).
    pub heartbeat_stale_ms: u64,
    /// Base delay between channel reconnect attempts (default 5s).
    pub reconnect_delay_ms: u64,
    /// Backoff multiplier; 1.0 keeps the delay fixed (default 1.0).
    pub reconnect_multiplier: f64,
    /// Backoff cap (default 60s).
    pub reconnect_max_delay_ms: u64,
    /// Window during which a torn-down channel can be revived (default 1s).
    pub channel_teardown_grace_ms: u64,
    /// Grace after `online` before one proactive reconnect (default 3s).
    pub online_grace_ms: u64,
    /// Attempts per recovery step within one session (default 2).
    pub recovery_step_attempts: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            probe_interval_ms: 60_000,
            wake_lock_reacquire_delay_ms: 1_000,
            validator_startup_delay_ms: 3_000,
            validator_interval_ms: 120_000,
            validator_visible_delay_ms: 1_000,
            focus_inactivity_ms: 60_000,
            trivial_dormancy_ms: 30_000,
            emergency_dormancy_ms: 300_000,
            heartbeat_interval_ms: 10_000,
            heartbeat_stale_ms: 30_000,
            reconnect_delay_ms: 5_000,
            reconnect_multiplier: 1.0,
            reconnect_max_delay_ms: 60_000,
            channel_teardown_grace_ms: 1_000,
            online_grace_ms: 3_000,
            recovery_step_attempts: 2,
        }
    }
}

impl LivenessConfig {
    /// Parse a TOML document. Missing keys fall back to the defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would stall timers or invert the escalation ladder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("probe_interval_ms", self.probe_interval_ms),
            ("validator_interval_ms", self.validator_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_stale_ms", self.heartbeat_stale_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("recovery_step_attempts", u64::from(self.recovery_step_attempts)),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field });
            }
        }

        let ordered = [
            (
                "trivial_dormancy_ms",
                self.trivial_dormancy_ms,
                "emergency_dormancy_ms",
                self.emergency_dormancy_ms,
            ),
            (
                "heartbeat_interval_ms",
                self.heartbeat_interval_ms,
                "heartbeat_stale_ms",
                self.heartbeat_stale_ms,
            ),
        ];
        for (lower, lower_ms, upper, upper_ms) in ordered {
            if lower_ms >= upper_ms {
                return Err(ConfigError::InvertedThresholds {
                    lower,
                    lower_ms,
                    upper,
                    upper_ms,
                });
            }
        }

        if self.reconnect_max_delay_ms < self.reconnect_delay_ms {
            return Err(ConfigError::InvertedThresholds {
                lower: "reconnect_delay_ms",
                lower_ms: self.reconnect_delay_ms,
                upper: "reconnect_max_delay_ms",
                upper_ms: self.reconnect_max_delay_ms,
            });
        }

        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.reconnect_multiplier));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LivenessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trivial_dormancy_ms, 30_000);
        assert_eq!(config.emergency_dormancy_ms, 300_000);
        assert_eq!(config.validator_interval_ms, 120_000);
        assert_eq!(config.heartbeat_interval_ms, 10_000);
        assert_eq!(config.heartbeat_stale_ms, 30_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = LivenessConfig::from_toml_str("trivial_dormancy_ms = 15000\n").unwrap();
        assert_eq!(config.trivial_dormancy_ms, 15_000);
        assert_eq!(config.emergency_dormancy_ms, 300_000);
        assert_eq!(config.recovery_step_attempts, 2);
    }

    #[test]
    fn empty_toml_is_default() {
        let config = LivenessConfig::from_toml_str("").unwrap();
        assert_eq!(config, LivenessConfig::default());
    }

    #[test]
    fn zero_interval_rejected() {
        let err = LivenessConfig::from_toml_str("heartbeat_interval_ms = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ZeroValue {
                field: "heartbeat_interval_ms"
            }
        ));
    }

    #[test]
    fn inverted_dormancy_thresholds_rejected() {
        let config = LivenessConfig {
            trivial_dormancy_ms: 400_000,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("trivial_dormancy_ms"));
    }

    #[test]
    fn stale_threshold_must_exceed_interval() {
        let config = LivenessConfig {
            heartbeat_stale_ms: 10_000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedThresholds { .. })
        ));
    }

    #[test]
    fn multiplier_below_one_rejected() {
        let config = LivenessConfig {
            reconnect_multiplier: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMultiplier(_))
        ));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = LivenessConfig::from_toml_str("probe_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
