//! Background-transition detector.

use std::sync::Mutex;

use pushwarden_core::{DormancyTracker, LifecycleSignal, PageTransition};

use crate::clock::Clock;
use crate::events::{EventBus, LivenessEvent};
use crate::lock;

/// Stamps raw page transitions with [`Clock`] and classifies them.
pub struct TransitionDetector {
    tracker: Mutex<DormancyTracker>,
    clock: Clock,
    bus: EventBus,
}

impl TransitionDetector {
    pub fn new(clock: Clock, bus: EventBus) -> Self {
        Self {
            tracker: Mutex::new(DormancyTracker::new()),
            clock,
            bus,
        }
    }

    /// Returns the classified signal, or `None` for a duplicate transition.
    pub fn observe(&self, transition: PageTransition) -> Option<LifecycleSignal> {
        let signal = lock(&self.tracker).observe(transition, self.clock.now_ms());
        match signal {
            Some(signal) => {
                tracing::info!(kind = ?signal.kind, dormant_ms = ?signal.dormant_ms, "lifecycle transition");
                self.bus.publish(LivenessEvent::Lifecycle(signal));
            }
            None => tracing::debug!(?transition, "duplicate transition ignored"),
        }
        signal
    }

    pub fn is_hidden(&self) -> bool {
        lock(&self.tracker).is_hidden()
    }

    pub fn is_online(&self) -> bool {
        lock(&self.tracker).is_online()
    }
}
