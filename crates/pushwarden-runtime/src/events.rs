//! In-process event bus for observers and tests.

use pushwarden_core::{ConnectionStatus, HealthState, LifecycleSignal, RecoveryOutcome};
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LivenessEvent {
    Lifecycle(LifecycleSignal),
    WorkerSuspect { silent_ms: u64 },
    SubscriptionMissing { expired: bool },
    SubscriptionRefreshed { endpoint: String },
    Validated { health: HealthState, retry_count: u32 },
    ConnectionChanged { status: ConnectionStatus },
    RecoveryStarted { id: u64, reason: String },
    RecoveryFinished { id: u64, outcome: RecoveryOutcome },
}

/// Cheap to clone; all clones publish to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LivenessEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LivenessEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget; having no listeners is normal.
    pub fn publish(&self, event: LivenessEvent) {
        let _ = self.tx.send(event);
    }
}
