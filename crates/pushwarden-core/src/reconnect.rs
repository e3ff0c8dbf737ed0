//! Channel reconnect backoff.
//!
//! Pure, deterministic state machine. All time values are passed in as
//! parameters (no system clock access).

use serde::{Deserialize, Serialize};

use crate::config::LivenessConfig;

// ─── Reconnect Policy ────────────────────────────────────────────

/// Delay policy between reconnect attempts.
///
/// With the default multiplier of 1.0 the delay is fixed; reconnecting is a
/// recovery aid, not a hot path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry in milliseconds (default 5000).
    pub initial_delay_ms: u64,
    /// Multiplier per consecutive failure (default 1.0).
    pub multiplier: f64,
    /// Maximum delay in milliseconds (default 60000).
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&LivenessConfig::default())
    }
}

impl From<&LivenessConfig> for ReconnectPolicy {
    fn from(config: &LivenessConfig) -> Self {
        Self {
            initial_delay_ms: config.reconnect_delay_ms,
            multiplier: config.reconnect_multiplier,
            max_delay_ms: config.reconnect_max_delay_ms,
        }
    }
}

// ─── Reconnect State Machine ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconnectState {
    /// No retry scheduled.
    Idle,
    /// Waiting for the next attempt.
    Waiting {
        /// Zero-based attempt counter.
        attempt: u32,
        /// Scheduled attempt time in milliseconds.
        next_attempt_ms: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    state: ReconnectState,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Idle,
        }
    }

    /// Record a failed or lost connection at `now_ms`; returns the delay before the next attempt.
    pub fn record_failure(&mut self, now_ms: u64) -> u64 {
        let attempt = match &self.state {
            ReconnectState::Waiting { attempt, .. } => attempt.saturating_add(1),
            ReconnectState::Idle => 0,
        };

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = (self.policy.initial_delay_ms as f64) * self.policy.multiplier.powi(exponent);
        let delay = if raw.is_finite() {
            (raw as u64).min(self.policy.max_delay_ms)
        } else {
            self.policy.max_delay_ms
        };

        self.state = ReconnectState::Waiting {
            attempt,
            next_attempt_ms: now_ms.saturating_add(delay),
        };
        delay
    }

    /// Connection confirmed; the next failure starts from the initial delay again.
    pub fn record_success(&mut self) {
        self.state = ReconnectState::Idle;
    }

    pub fn state(&self) -> &ReconnectState {
        &self.state
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.state, ReconnectState::Waiting { .. })
    }
}

// ─── Tests ───────────────────────────────────────────────────────
