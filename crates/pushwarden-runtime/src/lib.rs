//! pushwarden-runtime: tokio liveness runtime for push notifications and
//! realtime channels.
//!
//! The components here execute what `pushwarden_core::plan` decides. Every
//! platform capability (push manager, background worker, realtime transport,
//! wake lock) is reached through a trait in [`platform`], so hosts plug in
//! their bindings and tests plug in [`fakes`].

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod channels;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod http;
pub mod manager;
pub mod pending;
pub mod platform;
pub mod prober;
pub mod recovery;
pub mod timers;
pub mod validator;
pub mod wake_lock;

#[cfg(any(test, feature = "test-helpers"))]
pub mod fakes;

pub use channels::{ChannelStats, ChannelSubscription, ChannelSupervisor};
pub use clock::Clock;
pub use error::LivenessError;
pub use events::{EventBus, LivenessEvent};
pub use heartbeat::Heartbeat;
pub use manager::{NotificationManager, Platform};
pub use pending::PendingPoller;
pub use prober::{HealthProber, ProbeResult};
pub use recovery::{RecoveryDeps, RecoveryOrchestrator};
pub use validator::{SubscriptionValidator, ValidationResult};
pub use wake_lock::WakeLockController;

/// Lock a std mutex, recovering the data if a holder panicked.
///
/// Critical sections never await and hold plain counters and records, so the
/// state is still consistent after a panic elsewhere.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
