//! Trigger -> action dispatch table.
//!
//! Every event the runtime reacts to is reduced to a [`Trigger`]; [`plan`]
//! maps it to an ordered list of [`Action`]s. The runtime only executes the
//! actions, so the escalation policy can be tested without any IO.

use serde::{Deserialize, Serialize};

use crate::config::LivenessConfig;
use crate::dormancy::{LifecycleSignal, PageTransition};
use crate::protocol::WorkerSignal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    Lifecycle(LifecycleSignal),
    Worker(WorkerSignal),
    /// First stale heartbeat check of a silent episode.
    HeartbeatSuspect { silent_ms: u64 },
    /// Periodic validator timer fired.
    ValidatorTick,
    /// Standalone probe timer fired.
    ProbeTick,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Probe,
    NotifyWorkerVisibility {
        is_visible: bool,
        dormant_ms: Option<u64>,
    },
    Validate {
        reason: String,
        delay_ms: u64,
    },
    RealtimeHealthCheck,
    PendingCheck,
    ReconnectIfDisconnected {
        grace_ms: u64,
    },
    EmergencyRecovery {
        reason: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Probe => "probe",
            Action::NotifyWorkerVisibility { .. } => "notify_worker_visibility",
            Action::Validate { .. } => "validate",
            Action::RealtimeHealthCheck => "realtime_health_check",
            Action::PendingCheck => "pending_check",
            Action::ReconnectIfDisconnected { .. } => "reconnect_if_disconnected",
            Action::EmergencyRecovery { .. } => "emergency_recovery",
        }
    }
}

fn validate(reason: &str, delay_ms: u64) -> Action {
    Action::Validate {
        reason: reason.to_string(),
        delay_ms,
    }
}

fn recover(reason: impl Into<String>) -> Action {
    Action::EmergencyRecovery {
        reason: reason.into(),
    }
}

/// Map one trigger to the actions it requires, in execution order.
#[must_use]
pub fn plan(trigger: &Trigger, config: &LivenessConfig) -> Vec<Action> {
    match trigger {
        Trigger::Lifecycle(signal) => plan_lifecycle(signal, config),
        Trigger::Worker(signal) => plan_worker(signal, config),
        Trigger::HeartbeatSuspect { silent_ms } => {
            vec![recover(format!("heartbeat silent for {silent_ms}ms"))]
        }
        Trigger::ValidatorTick => vec![validate("periodic", 0)],
        Trigger::ProbeTick => vec![Action::Probe],
    }
}

fn plan_lifecycle(signal: &LifecycleSignal, config: &LivenessConfig) -> Vec<Action> {
    let dormant_ms = signal.dormant_ms.unwrap_or(0);
    match signal.kind {
        PageTransition::Visible => {
            let notify = Action::NotifyWorkerVisibility {
                is_visible: true,
                dormant_ms: Some(dormant_ms),
            };
            if dormant_ms >= config.emergency_dormancy_ms {
                vec![notify, recover(format!("dormant for {dormant_ms}ms"))]
            } else if dormant_ms >= config.trivial_dormancy_ms {
                vec![
                    notify,
                    validate("visibility restored", config.validator_visible_delay_ms),
                    Action::RealtimeHealthCheck,
                ]
            } else {
                vec![Action::Probe, notify]
            }
        }
        PageTransition::Hidden => vec![Action::NotifyWorkerVisibility {
            is_visible: false,
            dormant_ms: None,
        }],
        // The execution context may have been torn down; duration is irrelevant.
        PageTransition::Resumed => vec![recover("resumed from freeze")],
        PageTransition::Online => vec![
            validate("back online", 0),
            Action::PendingCheck,
            Action::ReconnectIfDisconnected {
                grace_ms: config.online_grace_ms,
            },
        ],
        PageTransition::Focus if dormant_ms >= config.focus_inactivity_ms => {
            vec![validate("focus after inactivity", 0)]
        }
        PageTransition::Focus
        | PageTransition::Blur
        | PageTransition::Frozen
        | PageTransition::Offline => Vec::new(),
    }
}

fn plan_worker(signal: &WorkerSignal, config: &LivenessConfig) -> Vec<Action> {
    match signal {
        WorkerSignal::PongResponse { .. } => Vec::new(),
        WorkerSignal::PushSubscriptionMissing => vec![validate("worker reported missing", 0)],
        WorkerSignal::PushSubscriptionStale => vec![validate("worker reported stale", 0)],
        WorkerSignal::ForceReinitialize { reason } => {
            vec![recover(format!("worker requested reinitialize: {reason}"))]
        }
        WorkerSignal::WakeUpCall { silent_duration_ms } => {
            if *silent_duration_ms >= config.emergency_dormancy_ms {
                vec![recover(format!("worker silent for {silent_duration_ms}ms"))]
            } else {
                vec![validate("worker wake-up call", 0), Action::PendingCheck]
            }
        }
    }
}
