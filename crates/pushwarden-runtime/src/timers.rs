//! Periodic timers: heartbeat, validator schedule, standalone probe.
//!
//! Every loop runs under a child of the manager's lifecycle token and only
//! feeds [`Trigger`]s to the dispatcher. `restart` cancels the current set and
//! starts a fresh one so all phases realign to "now".

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pushwarden_core::{HeartbeatVerdict, LivenessConfig, Trigger};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::error::LivenessError;
use crate::heartbeat::Heartbeat;
use crate::lock;
use crate::platform::TimerControl;

struct Running {
    parent: CancellationToken,
    current: CancellationToken,
    triggers: mpsc::UnboundedSender<Trigger>,
}

pub struct Timers {
    config: LivenessConfig,
    heartbeat: Arc<Heartbeat>,
    running: Mutex<Option<Running>>,
}

impl Timers {
    pub fn new(config: LivenessConfig, heartbeat: Arc<Heartbeat>) -> Self {
        Self {
            config,
            heartbeat,
            running: Mutex::new(None),
        }
    }

    /// Start the timer set for a new lifecycle. The first validation waits for
    /// the startup delay.
    pub fn start(&self, parent: &CancellationToken, triggers: mpsc::UnboundedSender<Trigger>) {
        let current = parent.child_token();
        let first_validation = Duration::from_millis(self.config.validator_startup_delay_ms);
        self.spawn_loops(&current, &triggers, first_validation);
        let previous = lock(&self.running).replace(Running {
            parent: parent.clone(),
            current,
            triggers,
        });
        if let Some(previous) = previous {
            previous.current.cancel();
        }
        tracing::debug!("timers started");
    }

    pub fn stop(&self) {
        if let Some(running) = lock(&self.running).take() {
            running.current.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|r| !r.current.is_cancelled())
    }

    fn spawn_loops(
        &self,
        token: &CancellationToken,
        triggers: &mpsc::UnboundedSender<Trigger>,
        first_validation: Duration,
    ) {
        let heartbeat_period = Duration::from_millis(self.config.heartbeat_interval_ms);
        let validator_period = Duration::from_millis(self.config.validator_interval_ms);
        let probe_period = Duration::from_millis(self.config.probe_interval_ms);

        tokio::spawn(heartbeat_loop(
            Arc::clone(&self.heartbeat),
            heartbeat_period,
            token.clone(),
            triggers.clone(),
        ));
        tokio::spawn(tick_loop(
            "validator",
            first_validation,
            validator_period,
            Trigger::ValidatorTick,
            token.clone(),
            triggers.clone(),
        ));
        tokio::spawn(tick_loop(
            "probe",
            probe_period,
            probe_period,
            Trigger::ProbeTick,
            token.clone(),
            triggers.clone(),
        ));
    }
}

impl TimerControl for Timers {
    /// Cancel the running set and start a new one, phases starting from now.
    fn restart(&self) -> Result<(), LivenessError> {
        let mut running = lock(&self.running);
        let Some(state) = running.as_mut() else {
            return Err(LivenessError::NotInitialized);
        };
        if state.parent.is_cancelled() {
            return Err(LivenessError::NotInitialized);
        }
        state.current.cancel();
        state.current = state.parent.child_token();
        self.heartbeat.reset();
        let validator_period = Duration::from_millis(self.config.validator_interval_ms);
        self.spawn_loops(&state.current, &state.triggers, validator_period);
        tracing::info!("timers restarted");
        Ok(())
    }
}

async fn heartbeat_loop(
    heartbeat: Arc<Heartbeat>,
    period: Duration,
    token: CancellationToken,
    triggers: mpsc::UnboundedSender<Trigger>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let HeartbeatVerdict::Suspect { silent_ms } = heartbeat.tick().await {
            if triggers.send(Trigger::HeartbeatSuspect { silent_ms }).is_err() {
                return;
            }
        }
    }
}

async fn tick_loop(
    name: &'static str,
    first: Duration,
    period: Duration,
    trigger: Trigger,
    token: CancellationToken,
    triggers: mpsc::UnboundedSender<Trigger>,
) {
    let mut ticker = interval_at(Instant::now() + first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        tracing::trace!(timer = name, "tick");
        if triggers.send(trigger.clone()).is_err() {
            return;
        }
    }
}
