//! Realtime connection status machine.
//!
//! Status only moves along `connected -> disconnected -> reconnecting ->
//! connected`. A transport reporting "subscribed" while the tracker still
//! believes it is disconnected records the intervening reconnect first, so
//! observers never see a direct `disconnected -> connected` hop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionStatus {
    /// Whether `self -> next` is an edge of the status machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::{Connected, Disconnected, Reconnecting};
        matches!(
            (self, next),
            (Connected, Disconnected)
                | (Disconnected, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
        )
    }
}

/// Current belief about realtime-channel health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_status_change_at: DateTime<Utc>,
    /// Reconnect attempts recorded since the last successful connection.
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: ConnectionState,
}

impl ConnectionTracker {
    /// A fresh tracker starts `Disconnected`; the first connect goes through `Reconnecting`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: ConnectionState {
                status: ConnectionStatus::Disconnected,
                last_status_change_at: now,
                reconnect_attempts: 0,
            },
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    /// Channel lost. Returns the transitions applied (possibly none).
    pub fn mark_lost(&mut self, now: DateTime<Utc>) -> Vec<ConnectionStatus> {
        let mut applied = Vec::new();
        self.step(ConnectionStatus::Disconnected, now, &mut applied);
        applied
    }

    /// A reconnect attempt is starting. Passes through `Disconnected` when
    /// currently connected, and counts the attempt either way.
    pub fn begin_reconnect(&mut self, now: DateTime<Utc>) -> Vec<ConnectionStatus> {
        let mut applied = Vec::new();
        if self.state.status == ConnectionStatus::Connected {
            self.step(ConnectionStatus::Disconnected, now, &mut applied);
        }
        self.step(ConnectionStatus::Reconnecting, now, &mut applied);
        self.state.reconnect_attempts = self.state.reconnect_attempts.saturating_add(1);
        applied
    }

    /// Transport confirmed the subscription.
    pub fn mark_connected(&mut self, now: DateTime<Utc>) -> Vec<ConnectionStatus> {
        let mut applied = Vec::new();
        if self.state.status == ConnectionStatus::Disconnected {
            self.step(ConnectionStatus::Reconnecting, now, &mut applied);
        }
        self.step(ConnectionStatus::Connected, now, &mut applied);
        if !applied.is_empty() {
            self.state.reconnect_attempts = 0;
        }
        applied
    }

    fn step(&mut self, next: ConnectionStatus, now: DateTime<Utc>, applied: &mut Vec<ConnectionStatus>) {
        if self.state.status.can_transition_to(next) {
            self.state.status = next;
            self.state.last_status_change_at = now;
            applied.push(next);
        }
    }
}
