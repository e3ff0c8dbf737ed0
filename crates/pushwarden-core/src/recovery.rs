//! Emergency recovery session record.
//!
//! The step order is fixed. A failed step never stops the sequence; it is
//! recorded and the remaining steps still run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    RegisterWorker,
    ValidateSubscription,
    ReconnectRealtime,
    ResumeWorkerTasks,
    PendingCheck,
    RestartTimers,
}

impl RecoveryStep {
    /// Declared execution order.
    pub const SEQUENCE: [RecoveryStep; 6] = [
        RecoveryStep::RegisterWorker,
        RecoveryStep::ValidateSubscription,
        RecoveryStep::ReconnectRealtime,
        RecoveryStep::ResumeWorkerTasks,
        RecoveryStep::PendingCheck,
        RecoveryStep::RestartTimers,
    ];

    /// A failure here cannot be fixed by the page; the user is told to reload.
    pub fn is_fatal(self) -> bool {
        matches!(self, RecoveryStep::RegisterWorker)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStep::RegisterWorker => "register_worker",
            RecoveryStep::ValidateSubscription => "validate_subscription",
            RecoveryStep::ReconnectRealtime => "reconnect_realtime",
            RecoveryStep::ResumeWorkerTasks => "resume_worker_tasks",
            RecoveryStep::PendingCheck => "pending_check",
            RecoveryStep::RestartTimers => "restart_timers",
        }
    }
}

impl std::fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    InProgress,
    /// Every step succeeded.
    Succeeded,
    /// At least one recoverable step failed; the next scheduled cycle retries.
    Partial,
    /// A fatal step failed or the session aborted; a reload is advised.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: RecoveryStep,
    pub attempts: u32,
    pub error: String,
}

/// One run of the emergency recovery procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySession {
    pub id: u64,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps_completed: Vec<RecoveryStep>,
    pub failures: Vec<StepFailure>,
    pub in_progress: bool,
    pub outcome: RecoveryOutcome,
}

impl RecoverySession {
    pub fn start(id: u64, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            reason: reason.into(),
            started_at: now,
            finished_at: None,
            steps_completed: Vec::new(),
            failures: Vec::new(),
            in_progress: true,
            outcome: RecoveryOutcome::InProgress,
        }
    }

    pub fn complete_step(&mut self, step: RecoveryStep) {
        self.steps_completed.push(step);
    }

    pub fn fail_step(&mut self, step: RecoveryStep, attempts: u32, error: impl Into<String>) {
        self.failures.push(StepFailure {
            step,
            attempts,
            error: error.into(),
        });
    }

    /// Steps that were attempted, completed or not, in execution order.
    pub fn steps_attempted(&self) -> Vec<RecoveryStep> {
        RecoveryStep::SEQUENCE
            .into_iter()
            .filter(|step| {
                self.steps_completed.contains(step) || self.failures.iter().any(|f| f.step == *step)
            })
            .collect()
    }

    pub fn has_fatal_failure(&self) -> bool {
        self.failures.iter().any(|f| f.step.is_fatal())
    }

    /// Close the session and derive its outcome.
    pub fn finish(&mut self, now: DateTime<Utc>) -> RecoveryOutcome {
        self.outcome = if self.has_fatal_failure() {
            RecoveryOutcome::Failed
        } else if self.failures.is_empty() {
            RecoveryOutcome::Succeeded
        } else {
            RecoveryOutcome::Partial
        };
        self.in_progress = false;
        self.finished_at = Some(now);
        self.outcome
    }

    /// Close the session after an unexpected error outside any step.
    pub fn abort(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.in_progress = false;
        self.finished_at = Some(now);
        self.outcome = RecoveryOutcome::Failed;
        let error = error.into();
        let next = RecoveryStep::SEQUENCE
            .into_iter()
            .find(|step| !self.steps_attempted().contains(step));
        if let Some(step) = next {
            self.fail_step(step, 1, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn sequence_is_declared_order() {
        assert_eq!(RecoveryStep::SEQUENCE[0], RecoveryStep::RegisterWorker);
        assert_eq!(RecoveryStep::SEQUENCE[5], RecoveryStep::RestartTimers);
        assert_eq!(RecoveryStep::SEQUENCE.len(), 6);
    }

    #[test]
    fn only_registration_is_fatal() {
        let fatal: Vec<_> = RecoveryStep::SEQUENCE
            .into_iter()
            .filter(|s| s.is_fatal())
            .collect();
        assert_eq!(fatal, vec![RecoveryStep::RegisterWorker]);
    }

    #[test]
    fn all_steps_completed_is_success() {
        let mut session = RecoverySession::start(1, "test", t(0));
        for step in RecoveryStep::SEQUENCE {
            session.complete_step(step);
        }
        assert_eq!(session.finish(t(2)), RecoveryOutcome::Succeeded);
        assert!(!session.in_progress);
        assert_eq!(session.finished_at, Some(t(2)));
    }

    #[test]
    fn recoverable_failure_is_partial() {
        let mut session = RecoverySession::start(1, "test", t(0));
        session.complete_step(RecoveryStep::RegisterWorker);
        session.complete_step(RecoveryStep::ValidateSubscription);
        session.fail_step(RecoveryStep::ReconnectRealtime, 2, "transport down");
        session.complete_step(RecoveryStep::ResumeWorkerTasks);
        session.complete_step(RecoveryStep::PendingCheck);
        session.complete_step(RecoveryStep::RestartTimers);
        assert_eq!(session.finish(t(1)), RecoveryOutcome::Partial);
        assert_eq!(session.steps_attempted(), RecoveryStep::SEQUENCE.to_vec());
    }

    #[test]
    fn registration_failure_is_fatal_even_if_rest_succeeds() {
        let mut session = RecoverySession::start(1, "test", t(0));
        session.fail_step(RecoveryStep::RegisterWorker, 2, "register threw");
        for step in &RecoveryStep::SEQUENCE[1..] {
            session.complete_step(*step);
        }
        assert_eq!(session.finish(t(1)), RecoveryOutcome::Failed);
    }

    #[test]
    fn abort_marks_failed_and_records_next_step() {
        let mut session = RecoverySession::start(7, "test", t(0));
        session.complete_step(RecoveryStep::RegisterWorker);
        session.abort(t(1), "panicked");
        assert_eq!(session.outcome, RecoveryOutcome::Failed);
        assert!(!session.in_progress);
        assert_eq!(session.failures[0].step, RecoveryStep::ValidateSubscription);
    }

    #[test]
    fn step_names_match_serde() {
        for step in RecoveryStep::SEQUENCE {
            let json = serde_json::to_value(step).unwrap();
            assert_eq!(json, step.as_str());
        }
    }
}
