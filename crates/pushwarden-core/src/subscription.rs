//! Push-subscription validity.
//!
//! [`assess`] classifies the handle returned by the push manager;
//! [`SubscriptionHealth`] is the validator's running belief, mutated once per
//! validation pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Browser-issued push credential, in the shape `PushSubscription.toJSON()` produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    /// Epoch milliseconds; `None` means the push service declared no expiry.
    #[serde(default)]
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

impl PushSubscription {
    /// Past its declared expiration at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiration_time.is_some_and(|expires| expires < now_ms)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Healthy,
    Stale,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAssessment {
    /// No subscription handle at all.
    Missing,
    /// Handle exists but its expiration time has passed.
    Expired,
    /// Handle exists and has not expired.
    Valid,
}

/// Classify the current subscription handle.
#[must_use]
pub fn assess(subscription: Option<&PushSubscription>, now_ms: i64) -> SubscriptionAssessment {
    match subscription {
        None => SubscriptionAssessment::Missing,
        Some(sub) if sub.is_expired(now_ms) => SubscriptionAssessment::Expired,
        Some(_) => SubscriptionAssessment::Valid,
    }
}

// ---------------------------------------------------------------------------
// Health record
// ---------------------------------------------------------------------------

/// Current belief about push-subscription validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionHealth {
    pub health: HealthState,
    pub last_validated_at: Option<DateTime<Utc>>,
    /// Consecutive passes that ended without a usable subscription, or whose lookup failed.
    pub retry_count: u32,
}

impl Default for SubscriptionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionHealth {
    /// Initial record: assumed healthy until the first pass says otherwise.
    pub fn new() -> Self {
        Self {
            health: HealthState::Healthy,
            last_validated_at: None,
            retry_count: 0,
        }
    }

    /// Subscription confirmed (or recreated and pushed to the server).
    pub fn mark_healthy(&mut self, now: DateTime<Utc>) {
        self.health = HealthState::Healthy;
        self.last_validated_at = Some(now);
        self.retry_count = 0;
    }

    /// Expired handle observed; an unsubscribe + recreate is underway.
    pub fn mark_stale(&mut self, now: DateTime<Utc>) {
        self.health = HealthState::Stale;
        self.last_validated_at = Some(now);
    }

    /// No usable subscription at the end of a pass.
    pub fn mark_missing(&mut self, now: DateTime<Utc>) {
        self.health = HealthState::Missing;
        self.last_validated_at = Some(now);
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// The lookup itself failed. Transient: health is left as it was.
    pub fn record_lookup_failure(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
