//! End-to-end liveness scenarios driven through `NotificationManager` on a
//! paused clock with in-memory platform fakes.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use pushwarden_core::{
    ConnectionStatus, HealthState, LivenessConfig, PageTransition, RecoveryOutcome, RecoveryStep,
    WorkerSignal,
};
use pushwarden_runtime::fakes::{FakePlatform, frozen_wall_clock, subscription};
use pushwarden_runtime::recovery::SUCCESS_MESSAGE;
use pushwarden_runtime::{Clock, LivenessEvent, NotificationManager};
use tokio::sync::broadcast;

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn started(fakes: &FakePlatform) -> NotificationManager {
    started_with_clock(fakes, frozen_wall_clock()).await
}

async fn started_with_clock(fakes: &FakePlatform, clock: Clock) -> NotificationManager {
    fakes.push.set_current(Some(subscription("https://push.test/current", None)));
    let manager = NotificationManager::with_clock(
        LivenessConfig::default(),
        "restaurant-1",
        fakes.platform(),
        clock,
    )
    .expect("default config is valid");
    manager.init().await.expect("init");
    manager
}

async fn next_recovery_outcome(events: &mut broadcast::Receiver<LivenessEvent>) -> RecoveryOutcome {
    loop {
        if let LivenessEvent::RecoveryFinished { outcome, .. } = events.recv().await.unwrap() {
            return outcome;
        }
    }
}

// ── Background / foreground ──

#[tokio::test(start_paused = true)]
async fn brief_background_only_probes() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    let _channel = manager.subscribe_channel("bookings:r1", "restaurant_id=eq.r1", |_| {}).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.connection_status(), ConnectionStatus::Connected);

    let passes = manager.validator().passes();
    let probes = fakes.probe.calls();
    manager.handle_transition(PageTransition::Hidden).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    manager.handle_transition(PageTransition::Visible).await;
    settle().await;

    assert_eq!(fakes.probe.calls(), probes + 1);
    assert_eq!(manager.validator().passes(), passes);
    assert_eq!(manager.recovery().sessions_started(), 0);
    assert_eq!(manager.connection_status(), ConnectionStatus::Connected);
    assert_eq!(fakes.transport.open_count("bookings:r1"), 1);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn medium_background_validates_and_checks_realtime() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    let passes = manager.validator().passes();

    manager.handle_transition(PageTransition::Hidden).await;
    tokio::time::sleep(Duration::from_secs(45)).await;
    manager.handle_transition(PageTransition::Visible).await;
    settle().await;
    // Validation waits for the visibility delay.
    assert_eq!(manager.validator().passes(), passes);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    settle().await;

    assert_eq!(manager.validator().passes(), passes + 1);
    assert_eq!(manager.recovery().sessions_started(), 0);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn extended_background_runs_full_recovery_once() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    let _channel = manager.subscribe_channel("bookings:r1", "restaurant_id=eq.r1", |_| {}).await;
    let mut events = manager.events();

    manager.handle_transition(PageTransition::Hidden).await;
    tokio::time::sleep(Duration::from_secs(400)).await;
    let signal = manager.handle_transition(PageTransition::Visible).await.unwrap();
    assert_eq!(signal.dormant_ms, Some(400_000));

    assert_eq!(next_recovery_outcome(&mut events).await, RecoveryOutcome::Succeeded);
    assert_eq!(manager.recovery().sessions_started(), 1);
    assert_eq!(fakes.notifier.successes(), vec![SUCCESS_MESSAGE.to_string()]);
    assert!(fakes.notifier.failures().is_empty());

    // Every step left its trace, in order.
    let kinds = fakes.worker.posted_kinds();
    let visibility = kinds.iter().rposition(|k| *k == "APP_VISIBILITY_CHANGE").unwrap();
    let resume = kinds.iter().rposition(|k| *k == "START_BACKGROUND_TASKS").unwrap();
    assert!(visibility < resume);
    assert_eq!(fakes.worker.registrations(), 2);
    assert_eq!(fakes.transport.open_count("bookings:r1"), 2);
    assert_eq!(manager.connection_status(), ConnectionStatus::Connected);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn screen_off_through_os_suspend_still_recovers() {
    let fakes = FakePlatform::default();
    let wall = Arc::new(AtomicI64::new(0));
    let source = Arc::clone(&wall);
    let clock = Clock::with_wall_source(move || source.load(Ordering::SeqCst));
    let manager = started_with_clock(&fakes, clock).await;
    let mut events = manager.events();

    manager.handle_transition(PageTransition::Hidden).await;
    // Suspended for ten minutes: the monotonic clock never moved.
    wall.fetch_add(600_000, Ordering::SeqCst);
    let signal = manager.handle_transition(PageTransition::Visible).await.unwrap();
    assert_eq!(signal.dormant_ms, Some(600_000));

    assert_eq!(next_recovery_outcome(&mut events).await, RecoveryOutcome::Succeeded);
    assert_eq!(manager.recovery().sessions_started(), 1);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn freeze_resume_always_recovers() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    let mut events = manager.events();

    manager.handle_transition(PageTransition::Frozen).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    manager.handle_transition(PageTransition::Resumed).await;

    assert_eq!(next_recovery_outcome(&mut events).await, RecoveryOutcome::Succeeded);
    manager.dispose().await;
}

// ── Subscription ──

#[tokio::test(start_paused = true)]
async fn expired_subscription_is_replaced_before_next_cycle() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    let expired = Utc::now().timestamp_millis() - 1_000;
    fakes.push.set_current(Some(subscription("https://push.test/old", Some(expired))));
    let mut events = manager.events();

    // First periodic validation fires after the startup delay.
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    settle().await;

    assert_eq!(fakes.push.unsubscribed(), vec!["https://push.test/old".to_string()]);
    assert_eq!(fakes.push.subscribes(), 1);
    assert_eq!(
        events.recv().await.unwrap(),
        LivenessEvent::SubscriptionMissing { expired: true }
    );
    let fresh = fakes.push.current().unwrap();
    assert_ne!(fresh.endpoint, "https://push.test/old");
    assert!(fakes.server.refreshed().contains(&fresh.endpoint));
    assert_eq!(manager.subscription_health().health, HealthState::Healthy);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_validations_share_one_lookup() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    fakes.push.set_lookup_delay(Duration::from_millis(300));
    let lookups = fakes.push.lookups();

    let (a, b, c) = tokio::join!(
        manager.validate("visibility restored"),
        manager.validate("focus after inactivity"),
        manager.validate("worker reported stale"),
    );
    assert_eq!(fakes.push.lookups(), lookups + 1);
    assert_eq!(a, b);
    assert_eq!(b, c);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn missing_signal_from_worker_recreates_subscription() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    fakes.push.set_current(None);

    fakes.worker.emit(WorkerSignal::PushSubscriptionMissing);
    settle().await;

    assert_eq!(fakes.push.subscribes(), 1);
    assert!(fakes.worker.posted_kinds().contains(&"SUBSCRIPTION_REFRESHED"));
    manager.dispose().await;
}

// ── Realtime channels ──

#[tokio::test(start_paused = true)]
async fn shared_channel_survives_first_unsubscribe() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;

    let first = manager.subscribe_channel("bookings:r1", "f", |_| {}).await;
    let second = manager.subscribe_channel("bookings:r1", "f", |_| {}).await;
    settle().await;
    assert_eq!(fakes.transport.open_count("bookings:r1"), 1);

    first.unsubscribe();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(fakes.transport.is_open("bookings:r1"));
    assert_eq!(manager.connection_status(), ConnectionStatus::Connected);

    second.unsubscribe();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!fakes.transport.is_open("bookings:r1"));
    assert_eq!(manager.stats().channels, 0);
    manager.dispose().await;
}

// ── Recovery ──

#[tokio::test(start_paused = true)]
async fn overlapping_triggers_share_one_recovery() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    fakes.worker.set_register_delay(Duration::from_millis(500));

    let (a, b) = tokio::join!(manager.recover("heartbeat"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.recover("resumed from freeze").await
    });
    assert_eq!(a.id, b.id);
    assert_eq!(a.steps_completed, RecoveryStep::SEQUENCE.to_vec());
    assert_eq!(manager.recovery().sessions_started(), 1);
    assert!(!manager.recovery().is_in_progress());
    assert_eq!(fakes.notifier.successes().len(), 1);
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn failed_reregistration_shows_one_failure() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    fakes.worker.set_register_failing(true);

    let session = manager.recover("test").await;
    assert_eq!(session.outcome, RecoveryOutcome::Failed);
    assert_eq!(fakes.notifier.failures().len(), 1);
    assert!(fakes.notifier.successes().is_empty());
    assert!(!manager.recovery().is_in_progress());
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn wake_lock_follows_visibility() {
    let fakes = FakePlatform::default();
    let manager = started(&fakes).await;
    assert!(manager.wake_lock().is_held());

    manager.handle_transition(PageTransition::Hidden).await;
    fakes.wake_lock.revoke();
    settle().await;
    assert!(!manager.wake_lock().is_held());

    manager.handle_transition(PageTransition::Visible).await;
    assert!(manager.wake_lock().is_held());
    assert_eq!(fakes.wake_lock.requests(), 2);
    manager.dispose().await;
}
