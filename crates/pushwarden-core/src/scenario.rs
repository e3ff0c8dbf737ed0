//! Scripted trigger sequences for threshold tuning and regression tests.
//!
//! A scenario is a list of timestamped events. [`replay`] runs page
//! transitions through a [`DormancyTracker`] and everything through [`plan`],
//! recording the actions each step produced.

use serde::{Deserialize, Serialize};

use crate::config::LivenessConfig;
use crate::dormancy::{DormancyTracker, LifecycleSignal, PageTransition};
use crate::policy::{Action, Trigger, plan};
use crate::protocol::WorkerSignal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Overrides applied on top of the caller's config.
    #[serde(default)]
    pub config: Option<LivenessConfig>,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub at_ms: u64,
    pub event: ScenarioEvent,
    /// Expected action names, in order. `None` skips the comparison.
    #[serde(default)]
    pub expect: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioEvent {
    Page { transition: PageTransition },
    Worker { signal: WorkerSignal },
    HeartbeatSuspect { silent_ms: u64 },
    ValidatorTick,
    ProbeTick,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayStep {
    pub at_ms: u64,
    /// Classified lifecycle signal; `None` for swallowed duplicates and non-page events.
    pub signal: Option<LifecycleSignal>,
    pub actions: Vec<Action>,
    pub expected: Option<Vec<String>>,
}

impl ReplayStep {
    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(Action::name).collect()
    }

    pub fn matches(&self) -> bool {
        self.expected
            .as_ref()
            .is_none_or(|expected| expected.iter().map(String::as_str).eq(self.action_names()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub name: String,
    pub steps: Vec<ReplayStep>,
}

impl ReplayReport {
    pub fn mismatches(&self) -> impl Iterator<Item = &ReplayStep> {
        self.steps.iter().filter(|step| !step.matches())
    }
}

/// Replay a scenario. The scenario's own config, if present, wins.
#[must_use]
pub fn replay(scenario: &Scenario, config: &LivenessConfig) -> ReplayReport {
    let config = scenario.config.as_ref().unwrap_or(config);
    let mut tracker = DormancyTracker::new();
    let steps = scenario
        .steps
        .iter()
        .map(|step| {
            let (signal, trigger) = match &step.event {
                ScenarioEvent::Page { transition } => {
                    let signal = tracker.observe(*transition, step.at_ms);
                    (signal, signal.map(Trigger::Lifecycle))
                }
                ScenarioEvent::Worker { signal } => (None, Some(Trigger::Worker(signal.clone()))),
                ScenarioEvent::HeartbeatSuspect { silent_ms } => (
                    None,
                    Some(Trigger::HeartbeatSuspect {
                        silent_ms: *silent_ms,
                    }),
                ),
                ScenarioEvent::ValidatorTick => (None, Some(Trigger::ValidatorTick)),
                ScenarioEvent::ProbeTick => (None, Some(Trigger::ProbeTick)),
            };
            ReplayStep {
                at_ms: step.at_ms,
                signal,
                actions: trigger.map(|t| plan(&t, config)).unwrap_or_default(),
                expected: step.expect.clone(),
            }
        })
        .collect();
    ReplayReport {
        name: scenario.name.clone(),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(at_ms: u64, transition: PageTransition, expect: &[&str]) -> ScenarioStep {
        ScenarioStep {
            at_ms,
            event: ScenarioEvent::Page { transition },
            expect: Some(expect.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn replay_measures_dormancy_between_steps() {
        let scenario = Scenario {
            name: "ten second background".into(),
            description: String::new(),
            config: None,
            steps: vec![
                page(0, PageTransition::Hidden, &["notify_worker_visibility"]),
                page(10_000, PageTransition::Visible, &["probe", "notify_worker_visibility"]),
            ],
        };
        let report = replay(&scenario, &LivenessConfig::default());
        assert_eq!(report.mismatches().count(), 0);
        assert_eq!(report.steps[1].signal.unwrap().dormant_ms, Some(10_000));
    }

    #[test]
    fn duplicate_transitions_plan_nothing() {
        let scenario = Scenario {
            name: "double hidden".into(),
            description: String::new(),
            config: None,
            steps: vec![
                page(0, PageTransition::Hidden, &["notify_worker_visibility"]),
                page(1_000, PageTransition::Hidden, &[]),
            ],
        };
        let report = replay(&scenario, &LivenessConfig::default());
        assert!(report.steps[1].signal.is_none());
        assert!(report.steps[1].matches());
    }

    #[test]
    fn mismatch_is_reported() {
        let scenario = Scenario {
            name: "wrong".into(),
            description: String::new(),
            config: None,
            steps: vec![page(0, PageTransition::Resumed, &["probe"])],
        };
        let report = replay(&scenario, &LivenessConfig::default());
        let bad: Vec<_> = report.mismatches().collect();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].action_names(), vec!["emergency_recovery"]);
    }

    #[test]
    fn parses_json_scenario() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "name": "wake",
                "steps": [
                    {"at_ms": 0, "event": {"kind": "worker", "signal": {"type": "SERVICE_WORKER_WAKE_UP_CALL", "silentDurationMs": 400000}}, "expect": ["emergency_recovery"]},
                    {"at_ms": 10, "event": {"kind": "validator_tick"}}
                ]
            }"#,
        )
        .unwrap();
        let report = replay(&scenario, &LivenessConfig::default());
        assert_eq!(report.mismatches().count(), 0);
        assert_eq!(report.steps[1].action_names(), vec!["validate"]);
    }
}
