//! In-memory platform fakes for tests and headless hosts.
//!
//! Each fake records what was asked of it and exposes `set_*` knobs to inject
//! latency or failures. Delays use `tokio::time`, so paused-clock tests stay
//! deterministic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pushwarden_core::{
    PendingNotification, PushSubscription, SubscriptionKeys, WorkerMessage, WorkerSignal,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::clock::Clock;
use crate::error::LivenessError;
use crate::lock;
use crate::manager::Platform;
use crate::platform::{
    ChannelTransport, NotificationServer, ProbeTarget, PushManager, TimerControl,
    TransportEvent, TransportStatus, UserNotifier, WakeLockPlatform, WorkerBridge,
};

pub fn subscription(endpoint: &str, expiration_time: Option<i64>) -> PushSubscription {
    PushSubscription {
        endpoint: endpoint.to_string(),
        expiration_time,
        keys: SubscriptionKeys {
            p256dh: "BPk1".to_string(),
            auth: "c2VjcmV0".to_string(),
        },
    }
}

/// Clock whose wall time never moves, so readings follow tokio time alone.
pub fn frozen_wall_clock() -> Clock {
    Clock::with_wall_source(|| 0)
}

pub fn pending_notification(id: &str) -> PendingNotification {
    PendingNotification {
        id: id.to_string(),
        title: format!("Notification {id}"),
        body: String::new(),
        tag: None,
        data: serde_json::Value::Null,
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// ── Probe ──

#[derive(Default)]
struct ProbeState {
    delay: Duration,
    failing: bool,
    calls: usize,
}

#[derive(Default)]
pub struct FakeProbe {
    state: Mutex<ProbeState>,
}

impl FakeProbe {
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }
}

#[async_trait]
impl ProbeTarget for FakeProbe {
    async fn probe(&self) -> Result<(), LivenessError> {
        let (delay, failing) = {
            let mut state = lock(&self.state);
            state.calls += 1;
            (state.delay, state.failing)
        };
        pause(delay).await;
        if failing {
            return Err(LivenessError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

// ── Wake lock ──

struct WakeLockState {
    supported: bool,
    failing: bool,
    request_delay: Duration,
    requests: usize,
    releases: usize,
    sentinel: Option<oneshot::Sender<()>>,
}

pub struct FakeWakeLock {
    state: Mutex<WakeLockState>,
}

impl Default for FakeWakeLock {
    fn default() -> Self {
        Self::with_support(true)
    }
}

impl FakeWakeLock {
    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            state: Mutex::new(WakeLockState {
                supported,
                failing: false,
                request_delay: Duration::ZERO,
                requests: 0,
                releases: 0,
                sentinel: None,
            }),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    pub fn set_request_delay(&self, delay: Duration) {
        lock(&self.state).request_delay = delay;
    }

    /// Simulate the platform revoking a held lock.
    pub fn revoke(&self) {
        if let Some(sentinel) = lock(&self.state).sentinel.take() {
            let _ = sentinel.send(());
        }
    }

    /// Request attempts, including failed ones.
    pub fn requests(&self) -> usize {
        lock(&self.state).requests
    }

    pub fn releases(&self) -> usize {
        lock(&self.state).releases
    }

    pub fn is_held(&self) -> bool {
        lock(&self.state).sentinel.is_some()
    }
}

#[async_trait]
impl WakeLockPlatform for FakeWakeLock {
    fn is_supported(&self) -> bool {
        lock(&self.state).supported
    }

    async fn request(&self) -> Result<oneshot::Receiver<()>, LivenessError> {
        let delay = {
            let mut state = lock(&self.state);
            state.requests += 1;
            state.request_delay
        };
        pause(delay).await;
        let mut state = lock(&self.state);
        if state.failing {
            return Err(LivenessError::Unsupported("wake lock denied"));
        }
        let (tx, rx) = oneshot::channel();
        state.sentinel = Some(tx);
        Ok(rx)
    }

    async fn release(&self) -> Result<(), LivenessError> {
        let mut state = lock(&self.state);
        state.releases += 1;
        state.sentinel = None;
        Ok(())
    }
}

// ── Push manager ──

struct PushState {
    supported: bool,
    current: Option<PushSubscription>,
    lookup_delay: Duration,
    lookup_failing: bool,
    subscribe_failing: bool,
    lookups: usize,
    subscribes: usize,
    unsubscribed: Vec<String>,
}

pub struct FakePushManager {
    state: Mutex<PushState>,
}

impl Default for FakePushManager {
    fn default() -> Self {
        Self {
            state: Mutex::new(PushState {
                supported: true,
                current: None,
                lookup_delay: Duration::ZERO,
                lookup_failing: false,
                subscribe_failing: false,
                lookups: 0,
                subscribes: 0,
                unsubscribed: Vec::new(),
            }),
        }
    }
}

impl FakePushManager {
    pub fn set_current(&self, subscription: Option<PushSubscription>) {
        lock(&self.state).current = subscription;
    }

    pub fn current(&self) -> Option<PushSubscription> {
        lock(&self.state).current.clone()
    }

    pub fn set_supported(&self, supported: bool) {
        lock(&self.state).supported = supported;
    }

    pub fn set_lookup_delay(&self, delay: Duration) {
        lock(&self.state).lookup_delay = delay;
    }

    pub fn set_lookup_failing(&self, failing: bool) {
        lock(&self.state).lookup_failing = failing;
    }

    pub fn set_subscribe_failing(&self, failing: bool) {
        lock(&self.state).subscribe_failing = failing;
    }

    pub fn lookups(&self) -> usize {
        lock(&self.state).lookups
    }

    pub fn subscribes(&self) -> usize {
        lock(&self.state).subscribes
    }

    /// Endpoints passed to `unsubscribe`, in order.
    pub fn unsubscribed(&self) -> Vec<String> {
        lock(&self.state).unsubscribed.clone()
    }
}

#[async_trait]
impl PushManager for FakePushManager {
    fn is_supported(&self) -> bool {
        lock(&self.state).supported
    }

    async fn get_subscription(&self) -> Result<Option<PushSubscription>, LivenessError> {
        let delay = {
            let mut state = lock(&self.state);
            state.lookups += 1;
            state.lookup_delay
        };
        pause(delay).await;
        let state = lock(&self.state);
        if state.lookup_failing {
            return Err(LivenessError::Push("getSubscription rejected".into()));
        }
        Ok(state.current.clone())
    }

    async fn subscribe(&self) -> Result<PushSubscription, LivenessError> {
        let mut state = lock(&self.state);
        state.subscribes += 1;
        if state.subscribe_failing {
            return Err(LivenessError::Push("subscribe rejected".into()));
        }
        let created = subscription(&format!("https://push.test/sub-{}", state.subscribes), None);
        state.current = Some(created.clone());
        Ok(created)
    }

    async fn unsubscribe(&self, subscription: &PushSubscription) -> Result<(), LivenessError> {
        let mut state = lock(&self.state);
        state.unsubscribed.push(subscription.endpoint.clone());
        if state
            .current
            .as_ref()
            .is_some_and(|c| c.endpoint == subscription.endpoint)
        {
            state.current = None;
        }
        Ok(())
    }
}

// ── Notification server ──

#[derive(Default)]
struct ServerState {
    refreshed: Vec<String>,
    refresh_failing: bool,
    pending: VecDeque<Vec<PendingNotification>>,
    pending_queries: Vec<(String, i64)>,
    pending_failing: bool,
}

#[derive(Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    /// Endpoints successfully refreshed, in order.
    pub fn refreshed(&self) -> Vec<String> {
        lock(&self.state).refreshed.clone()
    }

    pub fn set_refresh_failing(&self, failing: bool) {
        lock(&self.state).refresh_failing = failing;
    }

    /// The next pending query returns `batch`; later ones return nothing.
    pub fn queue_pending(&self, batch: Vec<PendingNotification>) {
        lock(&self.state).pending.push_back(batch);
    }

    /// `(tenant, since_ms)` per pending query.
    pub fn pending_queries(&self) -> Vec<(String, i64)> {
        lock(&self.state).pending_queries.clone()
    }

    pub fn set_pending_failing(&self, failing: bool) {
        lock(&self.state).pending_failing = failing;
    }
}

#[async_trait]
impl NotificationServer for FakeServer {
    async fn refresh_subscription(
        &self,
        _tenant_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), LivenessError> {
        let mut state = lock(&self.state);
        if state.refresh_failing {
            return Err(LivenessError::Status {
                status: 503,
                url: "/subscriptions/refresh".into(),
            });
        }
        state.refreshed.push(subscription.endpoint.clone());
        Ok(())
    }

    async fn pending_notifications(
        &self,
        tenant_id: &str,
        since_ms: i64,
        _source: &str,
    ) -> Result<Vec<PendingNotification>, LivenessError> {
        let mut state = lock(&self.state);
        state.pending_queries.push((tenant_id.to_string(), since_ms));
        if state.pending_failing {
            return Err(LivenessError::Status {
                status: 500,
                url: "/notifications/pending".into(),
            });
        }
        Ok(state.pending.pop_front().unwrap_or_default())
    }
}

// ── Worker ──

#[derive(Default)]
struct WorkerState {
    posted: Vec<WorkerMessage>,
    registrations: usize,
    register_delay: Duration,
    register_failing: bool,
    register_panics: bool,
    mute: bool,
}

/// Worker that answers every ping unless muted.
pub struct FakeWorker {
    state: Mutex<WorkerState>,
    signals: broadcast::Sender<WorkerSignal>,
}

impl Default for FakeWorker {
    fn default() -> Self {
        let (signals, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(WorkerState::default()),
            signals,
        }
    }
}

impl FakeWorker {
    pub fn posted(&self) -> Vec<WorkerMessage> {
        lock(&self.state).posted.clone()
    }

    pub fn posted_kinds(&self) -> Vec<&'static str> {
        lock(&self.state).posted.iter().map(WorkerMessage::kind).collect()
    }

    pub fn registrations(&self) -> usize {
        lock(&self.state).registrations
    }

    pub fn set_register_delay(&self, delay: Duration) {
        lock(&self.state).register_delay = delay;
    }

    pub fn set_register_failing(&self, failing: bool) {
        lock(&self.state).register_failing = failing;
    }

    pub fn set_register_panics(&self, panics: bool) {
        lock(&self.state).register_panics = panics;
    }

    /// Stop answering pings.
    pub fn set_mute(&self, mute: bool) {
        lock(&self.state).mute = mute;
    }

    /// Deliver a signal to every listener.
    pub fn emit(&self, signal: WorkerSignal) {
        let _ = self.signals.send(signal);
    }
}

#[async_trait]
impl WorkerBridge for FakeWorker {
    async fn register(&self) -> Result<(), LivenessError> {
        let (delay, failing, panics) = {
            let mut state = lock(&self.state);
            state.registrations += 1;
            (state.register_delay, state.register_failing, state.register_panics)
        };
        pause(delay).await;
        if panics {
            panic!("worker registration blew up");
        }
        if failing {
            return Err(LivenessError::Worker("registration rejected".into()));
        }
        Ok(())
    }

    async fn post(&self, message: WorkerMessage) -> Result<(), LivenessError> {
        let pong = {
            let mut state = lock(&self.state);
            let pong = match &message {
                WorkerMessage::PingRequest { timestamp } if !state.mute => Some(*timestamp),
                _ => None,
            };
            state.posted.push(message);
            pong
        };
        if let Some(timestamp) = pong {
            self.emit(WorkerSignal::PongResponse { timestamp });
        }
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<WorkerSignal> {
        self.signals.subscribe()
    }
}

// ── Realtime transport ──

#[derive(Default)]
struct ChannelState {
    sender: Option<mpsc::UnboundedSender<TransportEvent>>,
    attempts: usize,
    opens: usize,
    closes: usize,
}

#[derive(Default)]
struct TransportState {
    channels: HashMap<String, ChannelState>,
    open_failing: bool,
    close_delay: Duration,
}

/// Transport that confirms every successful open with `Subscribed`.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn set_open_failing(&self, failing: bool) {
        lock(&self.state).open_failing = failing;
    }

    /// Closes take effect only after `delay`.
    pub fn set_close_delay(&self, delay: Duration) {
        lock(&self.state).close_delay = delay;
    }

    /// Successful opens for `key`.
    pub fn open_count(&self, key: &str) -> usize {
        self.with_channel(key, |c| c.opens)
    }

    pub fn open_attempts(&self, key: &str) -> usize {
        self.with_channel(key, |c| c.attempts)
    }

    pub fn close_count(&self, key: &str) -> usize {
        self.with_channel(key, |c| c.closes)
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.with_channel(key, |c| c.sender.is_some())
    }

    /// Push an event into the open channel for `key`, if any.
    pub fn emit(&self, key: &str, event: TransportEvent) {
        let state = lock(&self.state);
        if let Some(sender) = state.channels.get(key).and_then(|c| c.sender.as_ref()) {
            let _ = sender.send(event);
        }
    }

    fn with_channel<T: Default>(&self, key: &str, f: impl FnOnce(&ChannelState) -> T) -> T {
        lock(&self.state).channels.get(key).map(f).unwrap_or_default()
    }
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn open(
        &self,
        key: &str,
        _filter: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, LivenessError> {
        let mut state = lock(&self.state);
        let failing = state.open_failing;
        let channel = state.channels.entry(key.to_string()).or_default();
        channel.attempts += 1;
        if failing {
            return Err(LivenessError::Transport(format!("cannot open {key}")));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Status(TransportStatus::Subscribed));
        channel.sender = Some(tx);
        channel.opens += 1;
        Ok(rx)
    }

    async fn close(&self, key: &str) -> Result<(), LivenessError> {
        let delay = lock(&self.state).close_delay;
        pause(delay).await;
        let mut state = lock(&self.state);
        let channel = state.channels.entry(key.to_string()).or_default();
        channel.closes += 1;
        channel.sender = None;
        Ok(())
    }
}

// ── Timers and notifier ──

#[derive(Default)]
pub struct FakeTimers {
    restarts: Mutex<usize>,
}

impl FakeTimers {
    pub fn restarts(&self) -> usize {
        *lock(&self.restarts)
    }
}

impl TimerControl for FakeTimers {
    fn restart(&self) -> Result<(), LivenessError> {
        *lock(&self.restarts) += 1;
        Ok(())
    }
}

#[derive(Default)]
struct Toasts {
    successes: Vec<String>,
    failures: Vec<String>,
}

#[derive(Default)]
pub struct FakeNotifier {
    toasts: Mutex<Toasts>,
}

impl FakeNotifier {
    pub fn successes(&self) -> Vec<String> {
        lock(&self.toasts).successes.clone()
    }

    pub fn failures(&self) -> Vec<String> {
        lock(&self.toasts).failures.clone()
    }
}

impl UserNotifier for FakeNotifier {
    fn success(&self, message: &str) {
        lock(&self.toasts).successes.push(message.to_string());
    }

    fn failure(&self, message: &str) {
        lock(&self.toasts).failures.push(message.to_string());
    }
}

// ── Bundle ──

/// One of every fake, wired into a [`Platform`].
#[derive(Default)]
pub struct FakePlatform {
    pub probe: Arc<FakeProbe>,
    pub wake_lock: Arc<FakeWakeLock>,
    pub push: Arc<FakePushManager>,
    pub server: Arc<FakeServer>,
    pub worker: Arc<FakeWorker>,
    pub transport: Arc<FakeTransport>,
    pub notifier: Arc<FakeNotifier>,
}

impl FakePlatform {
    pub fn platform(&self) -> Platform {
        Platform {
            probe: self.probe.clone(),
            wake_lock: self.wake_lock.clone(),
            push: self.push.clone(),
            server: self.server.clone(),
            worker: self.worker.clone(),
            transport: self.transport.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
