//! Realtime channel supervisor.
//!
//! Subscribers are reference-counted per channel key so repeated mounts share
//! one transport channel. Dropping the last subscriber schedules a teardown
//! after a short grace window; a new subscriber arriving inside the window
//! cancels it and reuses the open channel. One arriving after the window
//! waits for the in-flight close before opening a fresh channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use pushwarden_core::{
    ConnectionState, ConnectionStatus, ConnectionTracker, ReconnectPolicy, ReconnectTracker,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::LivenessError;
use crate::events::{EventBus, LivenessEvent};
use crate::lock;
use crate::platform::{ChannelTransport, TransportEvent, TransportStatus};

pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub connection: ConnectionState,
    pub channels: usize,
    pub subscribers: usize,
    pub reconnect_attempts: u32,
}

struct ChannelEntry {
    filter: String,
    subscribers: HashMap<u64, EventHandler>,
    /// Event pump of the currently open transport channel.
    pump: Option<CancellationToken>,
    /// Pending teardown. Cancelling it is the undo path.
    teardown: Option<CancellationToken>,
    /// Pending reconnect timer.
    retry: Option<CancellationToken>,
    /// Bumped on every open so a superseded pump ignores late events.
    generation: u64,
}

impl ChannelEntry {
    fn new(filter: &str) -> Self {
        Self {
            filter: filter.to_string(),
            subscribers: HashMap::new(),
            pump: None,
            teardown: None,
            retry: None,
            generation: 0,
        }
    }

    fn stop_tasks(&mut self) {
        for token in [self.pump.take(), self.retry.take(), self.teardown.take()]
            .into_iter()
            .flatten()
        {
            token.cancel();
        }
    }
}

/// A transport close still in flight for a key that left the table.
struct Closing {
    id: u64,
    /// Cancelled once the close returns.
    done: CancellationToken,
}

struct State {
    channels: HashMap<String, ChannelEntry>,
    closing: HashMap<String, Closing>,
    connection: ConnectionTracker,
    backoff: ReconnectTracker,
    next_subscriber: u64,
    next_close: u64,
}

impl State {
    fn begin_close(&mut self, key: &str) -> u64 {
        self.next_close += 1;
        let id = self.next_close;
        let previous = self.closing.insert(
            key.to_string(),
            Closing {
                id,
                done: CancellationToken::new(),
            },
        );
        if let Some(previous) = previous {
            previous.done.cancel();
        }
        id
    }

    fn end_close(&mut self, key: &str, id: u64) {
        if self.closing.get(key).is_some_and(|c| c.id == id) {
            if let Some(closing) = self.closing.remove(key) {
                closing.done.cancel();
            }
        }
    }
}

struct Inner {
    transport: Arc<dyn ChannelTransport>,
    clock: Clock,
    teardown_grace: Duration,
    state: Mutex<State>,
    status_tx: watch::Sender<ConnectionState>,
    bus: EventBus,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct ChannelSupervisor {
    inner: Arc<Inner>,
}

/// Handle returned by [`ChannelSupervisor::subscribe`]. Dropping it unsubscribes.
pub struct ChannelSubscription {
    key: String,
    id: u64,
    inner: Weak<Inner>,
}

impl ChannelSubscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            Inner::release(&inner, &self.key, self.id);
        }
    }
}

impl ChannelSupervisor {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        policy: ReconnectPolicy,
        teardown_grace: Duration,
        bus: EventBus,
    ) -> Self {
        let connection = ConnectionTracker::new(Utc::now());
        let (status_tx, _) = watch::channel(connection.state().clone());
        Self {
            inner: Arc::new(Inner {
                transport,
                clock: Clock::new(),
                teardown_grace,
                state: Mutex::new(State {
                    channels: HashMap::new(),
                    closing: HashMap::new(),
                    connection,
                    backoff: ReconnectTracker::new(policy),
                    next_subscriber: 0,
                    next_close: 0,
                }),
                status_tx,
                bus,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register interest in `key`. Opens the transport channel only for the
    /// first subscriber.
    pub async fn subscribe<F>(&self, key: &str, filter: &str, on_event: F) -> ChannelSubscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(on_event);
        let (id, needs_open, closing) = {
            let mut state = lock(&self.inner.state);
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            let closing = state.closing.get(key).map(|c| c.done.clone());
            match state.channels.get_mut(key) {
                Some(entry) => {
                    if let Some(teardown) = entry.teardown.take() {
                        teardown.cancel();
                        tracing::debug!(key, "pending teardown cancelled by new subscriber");
                    }
                    entry.subscribers.insert(id, handler);
                    (id, false, None)
                }
                None => {
                    let mut entry = ChannelEntry::new(filter);
                    entry.subscribers.insert(id, handler);
                    state.channels.insert(key.to_string(), entry);
                    (id, true, closing)
                }
            }
        };
        if needs_open {
            if let Some(done) = closing {
                tracing::debug!(key, "waiting for previous close before reopening");
                done.cancelled().await;
            }
            tracing::info!(key, filter, "opening realtime channel");
            Inner::open(&self.inner, key).await;
        }
        ChannelSubscription {
            key: key.to_string(),
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Close and reopen every channel regardless of current status.
    pub async fn force_reconnect(&self) -> Result<(), LivenessError> {
        let keys: Vec<String> = {
            let mut guard = lock(&self.inner.state);
            let state = &mut *guard;
            for entry in state.channels.values_mut() {
                for token in [entry.pump.take(), entry.retry.take()].into_iter().flatten() {
                    token.cancel();
                }
            }
            let keys: Vec<String> = state.channels.keys().cloned().collect();
            if !keys.is_empty() {
                let now = Utc::now();
                let mut changes = state.connection.mark_lost(now);
                changes.extend(state.connection.begin_reconnect(now));
                self.inner.publish_changes(state, &changes);
            }
            keys
        };
        if keys.is_empty() {
            tracing::debug!("force reconnect: no channels open");
            return Ok(());
        }

        tracing::info!(channels = keys.len(), "force reconnecting realtime channels");
        for key in &keys {
            if let Err(e) = self.inner.transport.close(key).await {
                tracing::debug!(key = %key, error = %e, "close before reconnect failed");
            }
        }
        let mut failed = 0;
        for key in &keys {
            if !Inner::open(&self.inner, key).await {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(LivenessError::ChannelsNotReopened {
                failed,
                total: keys.len(),
            });
        }
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.inner.state).connection.status()
    }

    pub fn stats(&self) -> ChannelStats {
        let state = lock(&self.inner.state);
        ChannelStats {
            connection: state.connection.state().clone(),
            channels: state.channels.len(),
            subscribers: state.channels.values().map(|e| e.subscribers.len()).sum(),
            reconnect_attempts: state.connection.state().reconnect_attempts,
        }
    }

    pub fn channel_count(&self) -> usize {
        lock(&self.inner.state).channels.len()
    }

    /// Connection-state updates. Dropping the receiver unsubscribes.
    pub fn on_connection_change(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    /// Close every channel immediately, skipping the teardown grace.
    pub async fn close_all(&self) {
        let keys: Vec<(String, u64)> = {
            let mut guard = lock(&self.inner.state);
            let state = &mut *guard;
            for entry in state.channels.values_mut() {
                entry.stop_tasks();
            }
            let keys: Vec<String> = state.channels.drain().map(|(key, _)| key).collect();
            let changes = state.connection.mark_lost(Utc::now());
            self.inner.publish_changes(state, &changes);
            keys.into_iter()
                .map(|key| {
                    let id = state.begin_close(&key);
                    (key, id)
                })
                .collect()
        };
        for (key, id) in keys {
            if let Err(e) = self.inner.transport.close(&key).await {
                tracing::debug!(key = %key, error = %e, "close failed");
            }
            lock(&self.inner.state).end_close(&key, id);
        }
    }
}

impl Inner {
    /// Open the transport channel for `key`. Returns `false` when the open
    /// failed and a retry was scheduled.
    async fn open(this: &Arc<Self>, key: &str) -> bool {
        let (filter, generation) = {
            let mut state = lock(&this.state);
            let Some(entry) = state.channels.get_mut(key) else {
                return true;
            };
            entry.generation += 1;
            (entry.filter.clone(), entry.generation)
        };

        match this.transport.open(key, &filter).await {
            Ok(rx) => {
                let pump = this.shutdown.child_token();
                let current = {
                    let mut state = lock(&this.state);
                    match state.channels.get_mut(key) {
                        Some(entry) if entry.generation == generation => {
                            if let Some(old) = entry.pump.replace(pump.clone()) {
                                old.cancel();
                            }
                            true
                        }
                        _ => false,
                    }
                };
                if current {
                    tokio::spawn(Self::pump(
                        Arc::clone(this),
                        key.to_string(),
                        generation,
                        rx,
                        pump,
                    ));
                }
                true
            }
            Err(e) => {
                Self::on_failure(this, key, generation, &e.to_string());
                false
            }
        }
    }

    async fn pump(
        this: Arc<Self>,
        key: String,
        generation: u64,
        mut rx: mpsc::UnboundedReceiver<TransportEvent>,
        token: CancellationToken,
    ) {
        loop {
            // Cancellation first: a superseded pump must not report the close
            // that replaced it.
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                event = rx.recv() => event,
            };
            match event {
                Some(TransportEvent::Data(payload)) => {
                    let handlers: Vec<EventHandler> = {
                        let state = lock(&this.state);
                        match state.channels.get(&key) {
                            Some(entry) if entry.generation == generation => {
                                entry.subscribers.values().cloned().collect()
                            }
                            _ => return,
                        }
                    };
                    for handler in handlers {
                        handler(&payload);
                    }
                }
                Some(TransportEvent::Status(TransportStatus::Subscribed)) => {
                    this.on_subscribed(&key, generation);
                }
                Some(TransportEvent::Status(TransportStatus::ChannelError(reason))) => {
                    Self::on_failure(&this, &key, generation, &reason);
                    return;
                }
                Some(TransportEvent::Status(TransportStatus::TimedOut)) => {
                    Self::on_failure(&this, &key, generation, "timed out");
                    return;
                }
                Some(TransportEvent::Status(TransportStatus::Closed)) | None => {
                    Self::on_failure(&this, &key, generation, "closed by transport");
                    return;
                }
            }
        }
    }

    fn on_subscribed(&self, key: &str, generation: u64) {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if !state
            .channels
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            return;
        }
        let changes = state.connection.mark_connected(Utc::now());
        state.backoff.record_success();
        tracing::info!(key, "realtime channel subscribed");
        self.publish_changes(state, &changes);
    }

    /// Channel error, timeout or close: go to `reconnecting` and retry after backoff.
    fn on_failure(this: &Arc<Self>, key: &str, generation: u64, reason: &str) {
        let (delay_ms, retry) = {
            let mut guard = lock(&this.state);
            let state = &mut *guard;
            let Some(entry) = state.channels.get_mut(key) else {
                return;
            };
            if entry.generation != generation || entry.retry.is_some() {
                return;
            }
            if let Some(pump) = entry.pump.take() {
                pump.cancel();
            }
            let retry = this.shutdown.child_token();
            entry.retry = Some(retry.clone());

            let now = Utc::now();
            let mut changes = state.connection.mark_lost(now);
            changes.extend(state.connection.begin_reconnect(now));
            let delay_ms = state.backoff.record_failure(this.clock.now_ms());
            this.publish_changes(state, &changes);
            (delay_ms, retry)
        };
        tracing::warn!(key, reason, delay_ms, "realtime channel lost, scheduling reconnect");

        let this = Arc::clone(this);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = retry.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
            {
                let mut state = lock(&this.state);
                match state.channels.get_mut(&key) {
                    Some(entry) => entry.retry = None,
                    None => return,
                }
            }
            if let Err(e) = this.transport.close(&key).await {
                tracing::debug!(key = %key, error = %e, "close before retry failed");
            }
            Self::open(&this, &key).await;
        });
    }

    fn release(this: &Arc<Self>, key: &str, id: u64) {
        let teardown = {
            let mut state = lock(&this.state);
            let Some(entry) = state.channels.get_mut(key) else {
                return;
            };
            entry.subscribers.remove(&id);
            if !entry.subscribers.is_empty() || entry.teardown.is_some() {
                return;
            }
            let token = this.shutdown.child_token();
            entry.teardown = Some(token.clone());
            token
        };

        // Dropped outside a runtime (e.g. at process exit): nothing left to tear down.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        tracing::debug!(key, grace_ms = this.teardown_grace.as_millis() as u64, "last subscriber left");
        let this = Arc::clone(this);
        let key = key.to_string();
        handle.spawn(async move {
            tokio::select! {
                _ = teardown.cancelled() => return,
                _ = tokio::time::sleep(this.teardown_grace) => {}
            }
            let close_id = {
                let mut guard = lock(&this.state);
                let state = &mut *guard;
                let still_idle = state.channels.get(&key).is_some_and(|entry| {
                    entry.subscribers.is_empty()
                        && entry.teardown.as_ref().is_some_and(|t| !t.is_cancelled())
                });
                if !still_idle {
                    return;
                }
                if let Some(mut entry) = state.channels.remove(&key) {
                    entry.stop_tasks();
                }
                if state.channels.is_empty() {
                    let changes = state.connection.mark_lost(Utc::now());
                    this.publish_changes(state, &changes);
                }
                state.begin_close(&key)
            };
            tracing::info!(key = %key, "realtime channel torn down");
            if let Err(e) = this.transport.close(&key).await {
                tracing::warn!(key = %key, error = %e, "channel close failed");
            }
            lock(&this.state).end_close(&key, close_id);
        });
    }

    fn publish_changes(&self, state: &State, changes: &[ConnectionStatus]) {
        if changes.is_empty() {
            return;
        }
        for status in changes {
            tracing::debug!(status = ?status, "connection status changed");
            self.bus.publish(LivenessEvent::ConnectionChanged { status: *status });
        }
        self.status_tx.send_replace(state.connection.state().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn supervisor(transport: Arc<FakeTransport>) -> ChannelSupervisor {
        ChannelSupervisor::new(
            transport,
            ReconnectPolicy {
                initial_delay_ms: 5_000,
                multiplier: 1.0,
                max_delay_ms: 60_000,
            },
            Duration::from_secs(1),
            EventBus::default(),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ── Reference counting ──

    #[tokio::test(start_paused = true)]
    async fn same_key_shares_one_channel() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport.clone());

        let a = sup.subscribe("bookings:r1", "restaurant_id=eq.r1", |_| {}).await;
        let b = sup.subscribe("bookings:r1", "restaurant_id=eq.r1", |_| {}).await;
        settle().await;
        assert_eq!(transport.open_count("bookings:r1"), 1);
        assert_eq!(sup.stats().subscribers, 2);

        a.unsubscribe();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(transport.is_open("bookings:r1"));
        assert_eq!(sup.status(), ConnectionStatus::Connected);

        b.unsubscribe();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!transport.is_open("bookings:r1"));
        assert_eq!(sup.channel_count(), 0);
        assert_eq!(sup.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_inside_grace_undoes_teardown() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport.clone());

        let a = sup.subscribe("k", "f", |_| {}).await;
        settle().await;
        a.unsubscribe();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let _b = sup.subscribe("k", "f", |_| {}).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(transport.is_open("k"));
        assert_eq!(transport.open_count("k"), 1);
        assert_eq!(transport.close_count("k"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_during_slow_close_waits_for_it() {
        let transport = Arc::new(FakeTransport::default());
        transport.set_close_delay(Duration::from_millis(200));
        let sup = supervisor(transport.clone());

        let a = sup.subscribe("k", "f", |_| {}).await;
        settle().await;
        a.unsubscribe();
        // Grace is over; the close is still in flight.
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert_eq!(sup.channel_count(), 0);

        let _b = sup.subscribe("k", "f", |_| {}).await;
        settle().await;
        assert_eq!(transport.close_count("k"), 1);
        assert_eq!(transport.open_count("k"), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(transport.is_open("k"));
        assert_eq!(sup.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn events_fan_out_to_every_subscriber() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport.clone());
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        let _a = sup
            .subscribe("k", "f", move |_| {
                h1.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        let h2 = Arc::clone(&hits);
        let _b = sup
            .subscribe("k", "f", move |_| {
                h2.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        settle().await;

        transport.emit("k", TransportEvent::Data(serde_json::json!({"id": 1})));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    // ── Status machine ──

    #[tokio::test(start_paused = true)]
    async fn first_connect_goes_through_reconnecting() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport.clone());
        let bus_rx = sup.inner.bus.subscribe();
        let _a = sup.subscribe("k", "f", |_| {}).await;
        settle().await;

        let mut rx = bus_rx;
        let mut seen = Vec::new();
        while let Ok(LivenessEvent::ConnectionChanged { status }) = rx.try_recv() {
            seen.push(status);
        }
        assert_eq!(
            seen,
            vec![ConnectionStatus::Reconnecting, ConnectionStatus::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn channel_error_retries_after_fixed_delay() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport.clone());
        let mut status = sup.on_connection_change();
        let _a = sup.subscribe("k", "f", |_| {}).await;
        settle().await;
        assert_eq!(sup.status(), ConnectionStatus::Connected);

        transport.emit("k", TransportEvent::Status(TransportStatus::ChannelError("boom".into())));
        settle().await;
        assert_eq!(sup.status(), ConnectionStatus::Reconnecting);
        assert_eq!(sup.stats().reconnect_attempts, 1);
        assert!(status.has_changed().unwrap());
        assert_eq!(status.borrow_and_update().status, ConnectionStatus::Reconnecting);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(transport.open_count("k"), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(transport.open_count("k"), 2);
        assert_eq!(sup.status(), ConnectionStatus::Connected);
        assert_eq!(sup.stats().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_keeps_retrying() {
        let transport = Arc::new(FakeTransport::default());
        transport.set_open_failing(true);
        let sup = supervisor(transport.clone());
        let _a = sup.subscribe("k", "f", |_| {}).await;
        assert_eq!(sup.status(), ConnectionStatus::Reconnecting);

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(transport.open_attempts("k"), 3);

        transport.set_open_failing(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(sup.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn force_reconnect_reopens_regardless_of_status() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport.clone());
        let _a = sup.subscribe("a", "f", |_| {}).await;
        let _b = sup.subscribe("b", "f", |_| {}).await;
        settle().await;

        sup.force_reconnect().await.unwrap();
        settle().await;
        assert_eq!(transport.open_count("a"), 2);
        assert_eq!(transport.open_count("b"), 2);
        assert_eq!(transport.close_count("a"), 1);
        assert_eq!(sup.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn force_reconnect_without_channels_is_ok() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport);
        assert!(sup.force_reconnect().await.is_ok());
        assert_eq!(sup.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn force_reconnect_reports_failed_reopen() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport.clone());
        let _a = sup.subscribe("a", "f", |_| {}).await;
        settle().await;
        transport.set_open_failing(true);

        let err = sup.force_reconnect().await.unwrap_err();
        assert!(matches!(
            err,
            LivenessError::ChannelsNotReopened { failed: 1, total: 1 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_skips_grace() {
        let transport = Arc::new(FakeTransport::default());
        let sup = supervisor(transport.clone());
        let _a = sup.subscribe("a", "f", |_| {}).await;
        settle().await;
        sup.close_all().await;
        assert!(!transport.is_open("a"));
        assert_eq!(sup.channel_count(), 0);
        assert_eq!(sup.status(), ConnectionStatus::Disconnected);
    }
}
