//! Emergency recovery orchestrator.
//!
//! `recover` is single-flight: a call arriving while a session runs gets that
//! session's result. Each session runs in its own task so a panic inside a
//! step is caught at the task boundary and reported as `Failed`. The
//! in-progress flag is cleared by a drop guard on every exit path. Sessions
//! stop at the next await once the bound lifecycle token is cancelled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use pushwarden_core::{HealthState, RecoveryOutcome, RecoverySession, RecoveryStep, WorkerMessage};
use tokio_util::sync::CancellationToken;

use crate::channels::ChannelSupervisor;
use crate::error::LivenessError;
use crate::events::{EventBus, LivenessEvent};
use crate::lock;
use crate::pending::PendingPoller;
use crate::platform::{TimerControl, UserNotifier, WorkerBridge};
use crate::validator::SubscriptionValidator;

pub const SUCCESS_MESSAGE: &str = "Notifications reconnected";
pub const FAILURE_MESSAGE: &str = "Notifications could not be restored. Please reload the page.";

type InFlight = Shared<BoxFuture<'static, RecoverySession>>;

/// Collaborators for one orchestrator.
pub struct RecoveryDeps {
    pub worker: Arc<dyn WorkerBridge>,
    pub validator: SubscriptionValidator,
    pub channels: ChannelSupervisor,
    pub pending: Arc<PendingPoller>,
    pub timers: Arc<dyn TimerControl>,
    pub notifier: Arc<dyn UserNotifier>,
    pub bus: EventBus,
    pub step_attempts: u32,
}

struct Inner {
    deps: RecoveryDeps,
    in_flight: Mutex<Option<InFlight>>,
    in_progress: AtomicBool,
    next_id: AtomicU64,
    lifecycle: Mutex<CancellationToken>,
}

#[derive(Clone)]
pub struct RecoveryOrchestrator {
    inner: Arc<Inner>,
}

/// Clears the single-flight state when a session ends.
struct SessionGuard {
    inner: Arc<Inner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        *lock(&self.inner.in_flight) = None;
        self.inner.in_progress.store(false, Ordering::SeqCst);
    }
}

impl RecoveryOrchestrator {
    pub fn new(deps: RecoveryDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                in_flight: Mutex::new(None),
                in_progress: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                lifecycle: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Tie later sessions to `token`: cancelling it stops a running session
    /// between awaits, without a user-visible signal.
    pub fn bind_lifecycle(&self, token: &CancellationToken) {
        *lock(&self.inner.lifecycle) = token.clone();
    }

    pub fn is_in_progress(&self) -> bool {
        self.inner.in_progress.load(Ordering::SeqCst)
    }

    /// Number of sessions started so far.
    pub fn sessions_started(&self) -> u64 {
        self.inner.next_id.load(Ordering::SeqCst)
    }

    pub async fn recover(&self, reason: &str) -> RecoverySession {
        let session = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(running) => {
                    tracing::info!(reason, "recovery already in progress, joining it");
                    running.clone()
                }
                None => {
                    let running = Inner::start(&self.inner, reason);
                    *slot = Some(running.clone());
                    running
                }
            }
        };
        session.await
    }
}

impl Inner {
    /// Spawn a session. Called with the in-flight slot locked.
    fn start(this: &Arc<Self>, reason: &str) -> InFlight {
        let id = this.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        this.in_progress.store(true, Ordering::SeqCst);
        let record = Arc::new(Mutex::new(RecoverySession::start(id, reason, Utc::now())));
        tracing::info!(id, reason, "emergency recovery started");
        this.deps.bus.publish(LivenessEvent::RecoveryStarted {
            id,
            reason: reason.to_string(),
        });

        let cancel = lock(&this.lifecycle).clone();
        let steps = tokio::spawn(Self::run_steps(
            Arc::clone(this),
            Arc::clone(&record),
            cancel.clone(),
        ));
        let guard = SessionGuard {
            inner: Arc::clone(this),
        };
        let this = Arc::clone(this);
        let supervisor = tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = steps.await {
                let detail = if e.is_panic() {
                    "recovery panicked"
                } else {
                    "recovery task cancelled"
                };
                tracing::error!(id, detail, "emergency recovery aborted");
                lock(&record).abort(Utc::now(), detail);
            }
            let session = lock(&record).clone();
            this.announce(&session, cancel.is_cancelled());
            session
        });

        async move {
            match supervisor.await {
                Ok(session) => session,
                Err(e) => {
                    // Only reachable if the runtime is shutting down.
                    let mut session = RecoverySession::start(id, "aborted", Utc::now());
                    session.abort(Utc::now(), e.to_string());
                    session
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_steps(
        this: Arc<Self>,
        record: Arc<Mutex<RecoverySession>>,
        cancel: CancellationToken,
    ) {
        for step in RecoveryStep::SEQUENCE {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(%step, "emergency recovery cancelled");
                    lock(&record).abort(Utc::now(), "recovery cancelled");
                    return;
                }
                result = this.attempt(step) => result,
            };
            match result {
                Ok(()) => {
                    tracing::info!(%step, "recovery step completed");
                    lock(&record).complete_step(step);
                }
                Err((attempts, e)) => {
                    if step.is_fatal() {
                        tracing::error!(%step, attempts, error = %e, "recovery step failed");
                    } else {
                        tracing::warn!(%step, attempts, error = %e, "recovery step failed, continuing");
                    }
                    lock(&record).fail_step(step, attempts, e.to_string());
                }
            }
        }
        let mut session = lock(&record);
        let outcome = session.finish(Utc::now());
        tracing::info!(
            id = session.id,
            ?outcome,
            completed = session.steps_completed.len(),
            failed = session.failures.len(),
            "emergency recovery finished"
        );
    }

    /// Run one step up to `step_attempts` times.
    async fn attempt(&self, step: RecoveryStep) -> Result<(), (u32, LivenessError)> {
        let attempts = self.deps.step_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run_step(step).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => return Err((attempt, e)),
                Err(e) => {
                    tracing::debug!(%step, attempt, error = %e, "recovery step attempt failed");
                    attempt += 1;
                }
            }
        }
    }

    async fn run_step(&self, step: RecoveryStep) -> Result<(), LivenessError> {
        let deps = &self.deps;
        match step {
            RecoveryStep::RegisterWorker => deps.worker.register().await,
            RecoveryStep::ValidateSubscription => {
                let result = deps.validator.validate("emergency recovery").await;
                if result.health.health == HealthState::Missing {
                    Err(LivenessError::SubscriptionUnavailable)
                } else {
                    Ok(())
                }
            }
            RecoveryStep::ReconnectRealtime => deps.channels.force_reconnect().await,
            RecoveryStep::ResumeWorkerTasks => {
                deps.worker.post(WorkerMessage::StartBackgroundTasks).await
            }
            RecoveryStep::PendingCheck => deps.pending.check().await.map(|_| ()),
            RecoveryStep::RestartTimers => deps.timers.restart(),
        }
    }

    /// Exactly one user-visible signal per finished session, none for
    /// `Partial` or a cancelled session.
    fn announce(&self, session: &RecoverySession, cancelled: bool) {
        match session.outcome {
            _ if cancelled => {}
            RecoveryOutcome::Succeeded => self.deps.notifier.success(SUCCESS_MESSAGE),
            RecoveryOutcome::Failed => self.deps.notifier.failure(FAILURE_MESSAGE),
            RecoveryOutcome::Partial | RecoveryOutcome::InProgress => {}
        }
        self.deps.bus.publish(LivenessEvent::RecoveryFinished {
            id: session.id,
            outcome: session.outcome,
        });
    }
}
