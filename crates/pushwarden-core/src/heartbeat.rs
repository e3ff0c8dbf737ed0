//! Ping/pong bookkeeping for the background worker.
//!
//! The worker's message port is a broadcast channel: pongs may arrive twice
//! or out of order. The last-pong timestamp therefore only ever advances.
//! Staleness alerts are edge-triggered, one per silent episode.

use serde::{Deserialize, Serialize};

// ─── Constants ───────────────────────────────────────────────────────

/// Default staleness window in milliseconds (30 seconds).
pub const DEFAULT_STALE_MS: u64 = 30_000;

// ─── Records ─────────────────────────────────────────────────────────

/// Outcome of one ping/pong round trip. Only the latest matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub sent_at_ms: u64,
    pub pong_received_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum HeartbeatVerdict {
    /// A pong arrived within the staleness window.
    Alive,
    /// First check past the window in this episode; raise the alarm.
    Suspect { silent_ms: u64 },
    /// Still past the window, alarm already raised.
    Silent { silent_ms: u64 },
}

// ─── Monitor ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    stale_ms: u64,
    /// Silence is measured from here when no newer pong exists.
    baseline_ms: u64,
    last_pong_ms: Option<u64>,
    latest: Option<HeartbeatRecord>,
    alerted: bool,
    pings_sent: u64,
    pongs_accepted: u64,
}

impl HeartbeatMonitor {
    pub fn new(stale_ms: u64, now_ms: u64) -> Self {
        Self {
            stale_ms,
            baseline_ms: now_ms,
            last_pong_ms: None,
            latest: None,
            alerted: false,
            pings_sent: 0,
            pongs_accepted: 0,
        }
    }

    /// Start a new round trip. Returns the timestamp to put in the ping.
    pub fn record_ping(&mut self, now_ms: u64) -> u64 {
        self.latest = Some(HeartbeatRecord {
            sent_at_ms: now_ms,
            pong_received_at_ms: None,
        });
        self.pings_sent = self.pings_sent.saturating_add(1);
        now_ms
    }

    /// Record a pong echoing `timestamp`. Returns `true` if it advanced the
    /// last-pong time; stale or duplicate pongs are ignored.
    pub fn record_pong(&mut self, timestamp: u64, now_ms: u64) -> bool {
        if self.last_pong_ms.is_some_and(|last| timestamp <= last) {
            return false;
        }
        self.last_pong_ms = Some(timestamp);
        self.pongs_accepted = self.pongs_accepted.saturating_add(1);
        self.alerted = false;

        if let Some(record) = self.latest.as_mut() {
            if timestamp >= record.sent_at_ms && record.pong_received_at_ms.is_none() {
                record.pong_received_at_ms = Some(now_ms);
            }
        }
        true
    }

    /// Milliseconds since the last sign of life.
    pub fn silent_ms(&self, now_ms: u64) -> u64 {
        let reference = self
            .last_pong_ms
            .map_or(self.baseline_ms, |pong| pong.max(self.baseline_ms));
        now_ms.saturating_sub(reference)
    }

    /// Evaluate staleness at `now_ms`.
    pub fn check(&mut self, now_ms: u64) -> HeartbeatVerdict {
        let silent_ms = self.silent_ms(now_ms);
        if silent_ms <= self.stale_ms {
            return HeartbeatVerdict::Alive;
        }
        if self.alerted {
            HeartbeatVerdict::Silent { silent_ms }
        } else {
            self.alerted = true;
            HeartbeatVerdict::Suspect { silent_ms }
        }
    }

    /// Realign after recovery: silence is measured from `now_ms` again.
    /// The last-pong time is kept so late pongs still cannot move it backwards.
    pub fn reset(&mut self, now_ms: u64) {
        self.baseline_ms = now_ms;
        self.alerted = false;
        self.latest = None;
    }

    pub fn last_pong_ms(&self) -> Option<u64> {
        self.last_pong_ms
    }

    pub fn latest(&self) -> Option<&HeartbeatRecord> {
        self.latest.as_ref()
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    pub fn pongs_accepted(&self) -> u64 {
        self.pongs_accepted
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
