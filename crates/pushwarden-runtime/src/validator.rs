//! Push-subscription validator.
//!
//! `validate` is single-flight: callers arriving while a pass is running share
//! its result instead of starting a second lookup.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use pushwarden_core::{
    HealthState, PushSubscription, SubscriptionAssessment, SubscriptionHealth, WorkerMessage,
    assess,
};
use serde::Serialize;

use crate::events::{EventBus, LivenessEvent};
use crate::lock;
use crate::platform::{NotificationServer, PushManager, WorkerBridge};

/// Result of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// What the pass found before any repair: `Missing` covers both an absent
    /// and an expired subscription.
    pub observed: HealthState,
    /// The health record after the pass.
    pub health: SubscriptionHealth,
    /// A fresh subscription was created during this pass.
    pub resubscribed: bool,
}

type InFlight = Shared<BoxFuture<'static, ValidationResult>>;

struct Inner {
    push: Arc<dyn PushManager>,
    server: Arc<dyn NotificationServer>,
    worker: Arc<dyn WorkerBridge>,
    tenant_id: String,
    bus: EventBus,
    health: Mutex<SubscriptionHealth>,
    in_flight: Mutex<Option<(u64, InFlight)>>,
    passes: Mutex<u64>,
}

#[derive(Clone)]
pub struct SubscriptionValidator {
    inner: Arc<Inner>,
}

/// Clears the in-flight slot when the pass ends, including by panic.
struct SlotGuard {
    inner: Arc<Inner>,
    pass: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = lock(&self.inner.in_flight);
        if slot.as_ref().is_some_and(|(pass, _)| *pass == self.pass) {
            *slot = None;
        }
    }
}

impl SubscriptionValidator {
    pub fn new(
        push: Arc<dyn PushManager>,
        server: Arc<dyn NotificationServer>,
        worker: Arc<dyn WorkerBridge>,
        tenant_id: impl Into<String>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                push,
                server,
                worker,
                tenant_id: tenant_id.into(),
                bus,
                health: Mutex::new(SubscriptionHealth::new()),
                in_flight: Mutex::new(None),
                passes: Mutex::new(0),
            }),
        }
    }

    pub fn health(&self) -> SubscriptionHealth {
        lock(&self.inner.health).clone()
    }

    /// Number of validation passes actually executed.
    pub fn passes(&self) -> u64 {
        *lock(&self.inner.passes)
    }

    pub async fn validate(&self, reason: &str) -> ValidationResult {
        let pass = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some((_, running)) => {
                    tracing::debug!(reason, "validation already running, joining it");
                    running.clone()
                }
                None => {
                    let id = {
                        let mut passes = lock(&self.inner.passes);
                        *passes += 1;
                        *passes
                    };
                    let guard = SlotGuard {
                        inner: Arc::clone(&self.inner),
                        pass: id,
                    };
                    let inner = Arc::clone(&self.inner);
                    let reason = reason.to_string();
                    let fut = async move {
                        let _guard = guard;
                        inner.run(&reason).await
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, fut.clone()));
                    fut
                }
            }
        };
        pass.await
    }
}

impl Inner {
    async fn run(&self, reason: &str) -> ValidationResult {
        tracing::info!(reason, "validating push subscription");

        if !self.push.is_supported() {
            tracing::warn!("push unsupported on this platform");
            return self.finish_unsupported();
        }

        let current = match self.push.get_subscription().await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(error = %e, "subscription lookup failed; will retry next cycle");
                let health = {
                    let mut health = lock(&self.health);
                    health.record_lookup_failure();
                    health.clone()
                };
                return self.report(health.health, health, false);
            }
        };

        match assess(current.as_ref(), Utc::now().timestamp_millis()) {
            SubscriptionAssessment::Valid => {
                if let Some(subscription) = current {
                    self.refresh_on_server(&subscription).await;
                }
                let health = {
                    let mut health = lock(&self.health);
                    health.mark_healthy(Utc::now());
                    health.clone()
                };
                self.report(HealthState::Healthy, health, false)
            }
            SubscriptionAssessment::Expired => {
                lock(&self.health).mark_stale(Utc::now());
                if let Some(expired) = current {
                    tracing::info!(endpoint = %expired.endpoint, "subscription expired, unsubscribing");
                    if let Err(e) = self.push.unsubscribe(&expired).await {
                        tracing::warn!(error = %e, "local unsubscribe failed");
                    }
                }
                self.recreate(true).await
            }
            SubscriptionAssessment::Missing => self.recreate(false).await,
        }
    }

    /// Health is `missing` here; create a replacement before the pass ends.
    async fn recreate(&self, expired: bool) -> ValidationResult {
        lock(&self.health).mark_missing(Utc::now());
        self.bus.publish(LivenessEvent::SubscriptionMissing { expired });

        match self.push.subscribe().await {
            Ok(subscription) => {
                tracing::info!(endpoint = %subscription.endpoint, "created new push subscription");
                self.refresh_on_server(&subscription).await;
                let message = WorkerMessage::SubscriptionRefreshed {
                    endpoint: subscription.endpoint.clone(),
                };
                if let Err(e) = self.worker.post(message).await {
                    tracing::warn!(error = %e, "failed to notify worker of new subscription");
                }
                self.bus.publish(LivenessEvent::SubscriptionRefreshed {
                    endpoint: subscription.endpoint,
                });
                let health = {
                    let mut health = lock(&self.health);
                    health.mark_healthy(Utc::now());
                    health.clone()
                };
                self.report(HealthState::Missing, health, true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "push subscribe failed");
                let health = lock(&self.health).clone();
                self.report(HealthState::Missing, health, false)
            }
        }
    }

    fn finish_unsupported(&self) -> ValidationResult {
        let health = {
            let mut health = lock(&self.health);
            health.mark_missing(Utc::now());
            health.clone()
        };
        self.report(HealthState::Missing, health, false)
    }

    /// A server-side failure does not downgrade health: the subscription may
    /// still deliver locally.
    async fn refresh_on_server(&self, subscription: &PushSubscription) {
        match self
            .server
            .refresh_subscription(&self.tenant_id, subscription)
            .await
        {
            Ok(()) => tracing::debug!(endpoint = %subscription.endpoint, "server refresh ok"),
            Err(e) => tracing::warn!(error = %e, "server refresh failed; keeping health"),
        }
    }

    fn report(
        &self,
        observed: HealthState,
        health: SubscriptionHealth,
        resubscribed: bool,
    ) -> ValidationResult {
        tracing::info!(
            observed = ?observed,
            health = ?health.health,
            retry_count = health.retry_count,
            resubscribed,
            "validation finished"
        );
        self.bus.publish(LivenessEvent::Validated {
            health: health.health,
            retry_count: health.retry_count,
        });
        ValidationResult {
            observed,
            health,
            resubscribed,
        }
    }
}
