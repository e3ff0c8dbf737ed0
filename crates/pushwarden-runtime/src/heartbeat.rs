//! Ping/pong heartbeat towards the background worker.
//!
//! Advisory only: a stale worker gets an `EMERGENCY_WAKE_UP` on every stale
//! tick, and the first stale tick of an episode is returned as `Suspect` for
//! the caller to escalate. Nothing here touches subscription or channel state.

use std::sync::{Arc, Mutex};

use pushwarden_core::{HeartbeatMonitor, HeartbeatVerdict, WorkerMessage};

use crate::clock::Clock;
use crate::events::{EventBus, LivenessEvent};
use crate::lock;
use crate::platform::WorkerBridge;

pub struct Heartbeat {
    worker: Arc<dyn WorkerBridge>,
    monitor: Mutex<HeartbeatMonitor>,
    clock: Clock,
    bus: EventBus,
}

impl Heartbeat {
    pub fn new(worker: Arc<dyn WorkerBridge>, stale_ms: u64, clock: Clock, bus: EventBus) -> Self {
        let monitor = HeartbeatMonitor::new(stale_ms, clock.now_ms());
        Self {
            worker,
            monitor: Mutex::new(monitor),
            clock,
            bus,
        }
    }

    /// Check staleness, then send the next ping.
    pub async fn tick(&self) -> HeartbeatVerdict {
        let now = self.clock.now_ms();
        let (verdict, timestamp) = {
            let mut monitor = lock(&self.monitor);
            let verdict = monitor.check(now);
            (verdict, monitor.record_ping(now))
        };

        match verdict {
            HeartbeatVerdict::Alive => {}
            HeartbeatVerdict::Suspect { silent_ms } => {
                tracing::warn!(silent_ms, "background worker unresponsive");
                self.bus.publish(LivenessEvent::WorkerSuspect { silent_ms });
                self.wake(silent_ms).await;
            }
            HeartbeatVerdict::Silent { silent_ms } => {
                tracing::debug!(silent_ms, "background worker still silent");
                self.wake(silent_ms).await;
            }
        }

        if let Err(e) = self.worker.post(WorkerMessage::PingRequest { timestamp }).await {
            tracing::debug!(error = %e, "ping failed");
        }
        verdict
    }

    /// Record a pong. Returns `false` for duplicates and out-of-order replies.
    pub fn handle_pong(&self, timestamp: u64) -> bool {
        let accepted = lock(&self.monitor).record_pong(timestamp, self.clock.now_ms());
        if !accepted {
            tracing::trace!(timestamp, "stale pong ignored");
        }
        accepted
    }

    /// Realign the silence baseline to now.
    pub fn reset(&self) {
        lock(&self.monitor).reset(self.clock.now_ms());
    }

    pub fn last_pong_ms(&self) -> Option<u64> {
        lock(&self.monitor).last_pong_ms()
    }

    async fn wake(&self, silent_ms: u64) {
        if let Err(e) = self.worker.post(WorkerMessage::EmergencyWakeUp { silent_ms }).await {
            tracing::warn!(error = %e, "emergency wake-up failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeWorker, frozen_wall_clock};
    use std::time::Duration;

    fn heartbeat(worker: Arc<FakeWorker>) -> Heartbeat {
        Heartbeat::new(worker, 30_000, frozen_wall_clock(), EventBus::default())
    }

    #[tokio::test(start_paused = true)]
    async fn tick_sends_timestamped_ping() {
        let worker = Arc::new(FakeWorker::default());
        let hb = heartbeat(worker.clone());
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(hb.tick().await, HeartbeatVerdict::Alive);
        assert_eq!(
            worker.posted(),
            vec![WorkerMessage::PingRequest { timestamp: 10_000 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_are_monotonic() {
        let worker = Arc::new(FakeWorker::default());
        let hb = heartbeat(worker);
        assert!(hb.handle_pong(20_000));
        assert!(!hb.handle_pong(10_000));
        assert!(!hb.handle_pong(20_000));
        assert_eq!(hb.last_pong_ms(), Some(20_000));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_wakes_worker_and_alerts_once() {
        let worker = Arc::new(FakeWorker::default());
        let hb = heartbeat(worker.clone());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(hb.tick().await, HeartbeatVerdict::Suspect { silent_ms: 31_000 }));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(hb.tick().await, HeartbeatVerdict::Silent { .. }));

        let wakes = worker
            .posted_kinds()
            .into_iter()
            .filter(|k| *k == "EMERGENCY_WAKE_UP")
            .count();
        assert_eq!(wakes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_realigns_baseline() {
        let worker = Arc::new(FakeWorker::default());
        let hb = heartbeat(worker);
        tokio::time::advance(Duration::from_secs(29)).await;
        hb.reset();
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(hb.tick().await, HeartbeatVerdict::Alive);
    }
}
