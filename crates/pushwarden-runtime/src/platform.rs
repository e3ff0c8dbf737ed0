//! Collaborator traits at the platform boundary.
//!
//! Everything the liveness core cannot own (browser APIs, the background
//! worker, remote services) sits behind one of these traits so hosts supply
//! the real bindings and tests supply fakes.

use async_trait::async_trait;
use pushwarden_core::{PendingNotification, PushSubscription, WorkerMessage, WorkerSignal};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::LivenessError;

/// Cheap side-effect-free round trip used as a liveness check.
#[async_trait]
pub trait ProbeTarget: Send + Sync {
    async fn probe(&self) -> Result<(), LivenessError>;
}

/// Screen wake lock.
#[async_trait]
pub trait WakeLockPlatform: Send + Sync {
    /// Checked once when the controller is built.
    fn is_supported(&self) -> bool;

    /// Acquire the lock. The receiver resolves if the platform later revokes it.
    async fn request(&self) -> Result<oneshot::Receiver<()>, LivenessError>;

    async fn release(&self) -> Result<(), LivenessError>;
}

/// The background worker's push manager.
#[async_trait]
pub trait PushManager: Send + Sync {
    fn is_supported(&self) -> bool;

    async fn get_subscription(&self) -> Result<Option<PushSubscription>, LivenessError>;

    async fn subscribe(&self) -> Result<PushSubscription, LivenessError>;

    async fn unsubscribe(&self, subscription: &PushSubscription) -> Result<(), LivenessError>;
}

/// Remote notification server. Both calls are idempotent server-side.
#[async_trait]
pub trait NotificationServer: Send + Sync {
    async fn refresh_subscription(
        &self,
        tenant_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), LivenessError>;

    async fn pending_notifications(
        &self,
        tenant_id: &str,
        since_ms: i64,
        source: &str,
    ) -> Result<Vec<PendingNotification>, LivenessError>;
}

/// Message port to the background worker.
///
/// Signals are broadcast: several listeners may attach, and duplicates or
/// reordering are possible.
#[async_trait]
pub trait WorkerBridge: Send + Sync {
    /// Register or update the worker script.
    async fn register(&self) -> Result<(), LivenessError>;

    async fn post(&self, message: WorkerMessage) -> Result<(), LivenessError>;

    fn signals(&self) -> broadcast::Receiver<WorkerSignal>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(TransportStatus),
    Data(serde_json::Value),
}

/// Realtime pub/sub transport. One open channel per key.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn open(
        &self,
        key: &str,
        filter: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, LivenessError>;

    async fn close(&self, key: &str) -> Result<(), LivenessError>;
}

/// The two user-visible signals.
pub trait UserNotifier: Send + Sync {
    fn success(&self, message: &str);
    fn failure(&self, message: &str);
}

/// Periodic timer owner, restarted at the end of recovery.
pub trait TimerControl: Send + Sync {
    fn restart(&self) -> Result<(), LivenessError>;
}
