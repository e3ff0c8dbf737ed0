//! pushwarden-core: pure liveness state machines for a push-notification
//! and realtime-sync pipeline.
//!
//! Everything in this crate is deterministic. Time is passed in as
//! milliseconds (or `DateTime<Utc>` for wall-clock record fields); nothing
//! here sleeps, spawns, or performs IO. The async runtime lives in
//! `pushwarden-runtime` and only executes the [`policy::Action`]s planned here.

pub mod config;
pub mod connection;
pub mod dormancy;
pub mod heartbeat;
pub mod policy;
pub mod protocol;
pub mod reconnect;
pub mod recovery;
pub mod scenario;
pub mod subscription;

pub use config::{ConfigError, LivenessConfig};
pub use connection::{ConnectionState, ConnectionStatus, ConnectionTracker};
pub use dormancy::{DormancyTracker, DormancyWindow, LifecycleSignal, PageTransition};
pub use heartbeat::{HeartbeatMonitor, HeartbeatRecord, HeartbeatVerdict};
pub use policy::{Action, Trigger, plan};
pub use protocol::{PendingNotification, WorkerMessage, WorkerSignal};
pub use reconnect::{ReconnectPolicy, ReconnectState, ReconnectTracker};
pub use recovery::{RecoveryOutcome, RecoverySession, RecoveryStep, StepFailure};
pub use subscription::{
    HealthState, PushSubscription, SubscriptionAssessment, SubscriptionHealth, SubscriptionKeys,
    assess,
};
