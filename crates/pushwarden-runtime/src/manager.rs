//! Composition root.
//!
//! [`NotificationManager`] builds every component from one [`Platform`] and
//! one [`LivenessConfig`], and owns their lifecycle. Host events go in through
//! `handle_transition` and the worker signal stream; both are reduced to
//! [`Trigger`]s, planned by `pushwarden_core::plan`, and the resulting actions
//! run as tasks bound to the current lifecycle token. `dispose` cancels all of
//! it, and a later `init` starts from a clean slate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pushwarden_core::{
    Action, ConnectionStatus, LifecycleSignal, LivenessConfig, PageTransition, ReconnectPolicy,
    RecoverySession, SubscriptionHealth, Trigger, WorkerMessage, WorkerSignal, plan,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::channels::{ChannelStats, ChannelSubscription, ChannelSupervisor};
use crate::clock::Clock;
use crate::detector::TransitionDetector;
use crate::error::LivenessError;
use crate::events::{EventBus, LivenessEvent};
use crate::heartbeat::Heartbeat;
use crate::lock;
use crate::pending::PendingPoller;
use crate::platform::{
    ChannelTransport, NotificationServer, ProbeTarget, PushManager, UserNotifier,
    WakeLockPlatform, WorkerBridge,
};
use crate::prober::{HealthProber, ProbeResult};
use crate::recovery::{FAILURE_MESSAGE, RecoveryDeps, RecoveryOrchestrator};
use crate::timers::Timers;
use crate::validator::{SubscriptionValidator, ValidationResult};
use crate::wake_lock::WakeLockController;

/// Source tag sent with pending-notification checks.
const PENDING_SOURCE: &str = "liveness";

/// Platform bindings supplied by the host.
#[derive(Clone)]
pub struct Platform {
    pub probe: Arc<dyn ProbeTarget>,
    pub wake_lock: Arc<dyn WakeLockPlatform>,
    pub push: Arc<dyn PushManager>,
    pub server: Arc<dyn NotificationServer>,
    pub worker: Arc<dyn WorkerBridge>,
    pub transport: Arc<dyn ChannelTransport>,
    pub notifier: Arc<dyn UserNotifier>,
}

struct Lifecycle {
    token: CancellationToken,
    triggers: mpsc::UnboundedSender<Trigger>,
}

struct Inner {
    config: LivenessConfig,
    worker: Arc<dyn WorkerBridge>,
    notifier: Arc<dyn UserNotifier>,
    bus: EventBus,
    prober: HealthProber,
    wake_lock: WakeLockController,
    validator: SubscriptionValidator,
    channels: ChannelSupervisor,
    detector: TransitionDetector,
    heartbeat: Arc<Heartbeat>,
    pending: Arc<PendingPoller>,
    timers: Arc<Timers>,
    recovery: RecoveryOrchestrator,
    lifecycle: Mutex<Option<Lifecycle>>,
}

#[derive(Clone)]
pub struct NotificationManager {
    inner: Arc<Inner>,
}

impl NotificationManager {
    pub fn new(
        config: LivenessConfig,
        tenant_id: impl Into<String>,
        platform: Platform,
    ) -> Result<Self, LivenessError> {
        Self::with_clock(config, tenant_id, platform, Clock::new())
    }

    /// Like [`new`](Self::new), measuring dormancy and heartbeat silence on `clock`.
    pub fn with_clock(
        config: LivenessConfig,
        tenant_id: impl Into<String>,
        platform: Platform,
        clock: Clock,
    ) -> Result<Self, LivenessError> {
        config.validate()?;
        let tenant_id = tenant_id.into();
        let bus = EventBus::default();

        let prober = HealthProber::new(
            platform.probe,
            Duration::from_millis(config.probe_timeout_ms),
        );
        let wake_lock = WakeLockController::new(
            platform.wake_lock,
            Duration::from_millis(config.wake_lock_reacquire_delay_ms),
        );
        let validator = SubscriptionValidator::new(
            platform.push,
            Arc::clone(&platform.server),
            Arc::clone(&platform.worker),
            tenant_id.clone(),
            bus.clone(),
        );
        let channels = ChannelSupervisor::new(
            platform.transport,
            ReconnectPolicy::from(&config),
            Duration::from_millis(config.channel_teardown_grace_ms),
            bus.clone(),
        );
        let detector = TransitionDetector::new(clock.clone(), bus.clone());
        let heartbeat = Arc::new(Heartbeat::new(
            Arc::clone(&platform.worker),
            config.heartbeat_stale_ms,
            clock,
            bus.clone(),
        ));
        let pending = Arc::new(PendingPoller::new(
            platform.server,
            Arc::clone(&platform.worker),
            tenant_id,
            PENDING_SOURCE,
        ));
        let timers = Arc::new(Timers::new(config.clone(), Arc::clone(&heartbeat)));
        let recovery = RecoveryOrchestrator::new(RecoveryDeps {
            worker: Arc::clone(&platform.worker),
            validator: validator.clone(),
            channels: channels.clone(),
            pending: Arc::clone(&pending),
            timers: timers.clone(),
            notifier: Arc::clone(&platform.notifier),
            bus: bus.clone(),
            step_attempts: config.recovery_step_attempts,
        });

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                worker: platform.worker,
                notifier: platform.notifier,
                bus,
                prober,
                wake_lock,
                validator,
                channels,
                detector,
                heartbeat,
                pending,
                timers,
                recovery,
                lifecycle: Mutex::new(None),
            }),
        })
    }

    /// Register the worker and start every loop. A second call while
    /// initialized is a no-op.
    pub async fn init(&self) -> Result<(), LivenessError> {
        if self.is_initialized() {
            tracing::debug!("already initialized");
            return Ok(());
        }

        if let Err(e) = self.inner.worker.register().await {
            tracing::error!(error = %e, "background worker registration failed");
            self.inner.notifier.failure(FAILURE_MESSAGE);
            return Err(e);
        }

        let token = CancellationToken::new();
        let (triggers, rx) = mpsc::unbounded_channel();
        {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if lifecycle.is_some() {
                // Lost a race with a concurrent init.
                return Ok(());
            }
            *lifecycle = Some(Lifecycle {
                token: token.clone(),
                triggers: triggers.clone(),
            });
        }

        self.inner.recovery.bind_lifecycle(&token);
        tokio::spawn(Inner::dispatch(Arc::clone(&self.inner), rx, token.clone()));
        tokio::spawn(Inner::pump_worker_signals(
            Arc::clone(&self.inner),
            self.inner.worker.signals(),
            token.clone(),
        ));
        self.inner.heartbeat.reset();
        self.inner.timers.start(&token, triggers);
        self.inner.wake_lock.acquire().await;

        if let Err(e) = self.inner.worker.post(WorkerMessage::StartBackgroundTasks).await {
            tracing::warn!(error = %e, "could not start worker background tasks");
        }
        tracing::info!("notification manager initialized");
        Ok(())
    }

    /// Cancel every task and timer, release the wake lock, close all channels.
    pub async fn dispose(&self) {
        let taken = lock(&self.inner.lifecycle).take();
        let Some(lifecycle) = taken else {
            return;
        };
        lifecycle.token.cancel();
        self.inner.timers.stop();
        self.inner.wake_lock.release().await;
        self.inner.channels.close_all().await;
        tracing::info!("notification manager disposed");
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.inner.lifecycle).is_some()
    }

    /// Feed a page lifecycle transition. Returns the classified signal, or
    /// `None` for a duplicate.
    pub async fn handle_transition(&self, transition: PageTransition) -> Option<LifecycleSignal> {
        let signal = self.inner.detector.observe(transition)?;
        match transition {
            PageTransition::Visible => self.inner.wake_lock.set_visible(true).await,
            PageTransition::Hidden => self.inner.wake_lock.set_visible(false).await,
            _ => {}
        }
        self.inner.submit(Trigger::Lifecycle(signal));
        Some(signal)
    }

    /// Feed a worker signal directly, for hosts that do not expose a stream.
    pub fn handle_worker_signal(&self, signal: WorkerSignal) {
        self.inner.on_worker_signal(signal);
    }

    pub async fn subscribe_channel<F>(
        &self,
        key: &str,
        filter: &str,
        on_event: F,
    ) -> ChannelSubscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.inner.channels.subscribe(key, filter, on_event).await
    }

    pub async fn probe(&self) -> ProbeResult {
        self.inner.prober.probe().await
    }

    pub async fn validate(&self, reason: &str) -> ValidationResult {
        self.inner.validator.validate(reason).await
    }

    pub async fn recover(&self, reason: &str) -> RecoverySession {
        self.inner.recovery.recover(reason).await
    }

    pub async fn check_pending(&self) -> Result<usize, LivenessError> {
        self.inner.pending.check().await
    }

    pub fn events(&self) -> broadcast::Receiver<LivenessEvent> {
        self.inner.bus.subscribe()
    }

    pub fn stats(&self) -> ChannelStats {
        self.inner.channels.stats()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.channels.status()
    }

    pub fn subscription_health(&self) -> SubscriptionHealth {
        self.inner.validator.health()
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.inner.config
    }

    pub fn channels(&self) -> &ChannelSupervisor {
        &self.inner.channels
    }

    pub fn validator(&self) -> &SubscriptionValidator {
        &self.inner.validator
    }

    pub fn recovery(&self) -> &RecoveryOrchestrator {
        &self.inner.recovery
    }

    pub fn wake_lock(&self) -> &WakeLockController {
        &self.inner.wake_lock
    }

    pub fn last_pong_ms(&self) -> Option<u64> {
        self.inner.heartbeat.last_pong_ms()
    }
}

impl Inner {
    fn submit(&self, trigger: Trigger) {
        let lifecycle = lock(&self.lifecycle);
        match lifecycle.as_ref() {
            Some(lifecycle) => {
                if lifecycle.triggers.send(trigger).is_err() {
                    tracing::debug!("dispatcher gone, trigger dropped");
                }
            }
            None => tracing::debug!(?trigger, "not initialized, trigger dropped"),
        }
    }

    fn on_worker_signal(&self, signal: WorkerSignal) {
        match signal {
            WorkerSignal::PongResponse { timestamp } => {
                self.heartbeat.handle_pong(timestamp);
            }
            other => {
                tracing::info!(?other, "worker signal");
                self.submit(Trigger::Worker(other));
            }
        }
    }

    async fn pump_worker_signals(
        this: Arc<Self>,
        mut signals: broadcast::Receiver<WorkerSignal>,
        token: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = token.cancelled() => return,
                received = signals.recv() => received,
            };
            match received {
                Ok(signal) => this.on_worker_signal(signal),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "worker signal listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::warn!("worker signal stream closed");
                    return;
                }
            }
        }
    }

    async fn dispatch(
        this: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Trigger>,
        token: CancellationToken,
    ) {
        loop {
            let trigger = tokio::select! {
                _ = token.cancelled() => return,
                trigger = rx.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => return,
                },
            };
            let actions = plan(&trigger, &this.config);
            if actions.is_empty() {
                tracing::debug!(?trigger, "no action");
                continue;
            }
            tracing::debug!(
                ?trigger,
                actions = ?actions.iter().map(Action::name).collect::<Vec<_>>(),
                "dispatching"
            );
            for action in actions {
                let this = Arc::clone(&this);
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = this.execute(action) => {}
                    }
                });
            }
        }
    }

    async fn execute(&self, action: Action) {
        match action {
            Action::Probe => {
                self.prober.probe().await;
            }
            Action::NotifyWorkerVisibility {
                is_visible,
                dormant_ms,
            } => {
                let message = WorkerMessage::AppVisibilityChange {
                    is_visible,
                    dormant_ms,
                };
                if let Err(e) = self.worker.post(message).await {
                    tracing::debug!(error = %e, "visibility notice not delivered");
                }
            }
            Action::Validate { reason, delay_ms } => {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                self.validator.validate(&reason).await;
            }
            Action::RealtimeHealthCheck => {
                let probe = self.prober.probe().await;
                let status = self.channels.status();
                if status != ConnectionStatus::Connected && self.channels.channel_count() > 0 {
                    tracing::info!(?status, probe_ok = probe.ok, "realtime not connected, reconnecting");
                    if let Err(e) = self.channels.force_reconnect().await {
                        tracing::warn!(error = %e, "realtime reconnect failed");
                    }
                }
            }
            Action::PendingCheck => {
                if let Err(e) = self.pending.check().await {
                    tracing::warn!(error = %e, "pending notification check failed");
                }
            }
            Action::ReconnectIfDisconnected { grace_ms } => {
                tokio::time::sleep(Duration::from_millis(grace_ms)).await;
                if self.channels.status() != ConnectionStatus::Connected
                    && self.channels.channel_count() > 0
                {
                    tracing::info!("still not connected after grace, reconnecting");
                    if let Err(e) = self.channels.force_reconnect().await {
                        tracing::warn!(error = %e, "realtime reconnect failed");
                    }
                }
            }
            Action::EmergencyRecovery { reason } => {
                self.recovery.recover(&reason).await;
            }
        }
    }
}
