//! Page <-> background worker message protocol.
//!
//! Not wire-stable across releases, but both sides of one build agree on it.
//! Tags are SCREAMING_SNAKE_CASE and fields camelCase so the JSON matches what
//! a service worker script posts.

use serde::{Deserialize, Serialize};

/// A notification returned by the pending-check endpoint, displayed by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// Page -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum WorkerMessage {
    StartBackgroundTasks,
    PingRequest {
        timestamp: u64,
    },
    AppVisibilityChange {
        is_visible: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dormant_ms: Option<u64>,
    },
    EmergencyWakeUp {
        silent_ms: u64,
    },
    DisplayNotifications {
        notifications: Vec<PendingNotification>,
    },
    SubscriptionRefreshed {
        endpoint: String,
    },
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartBackgroundTasks => "START_BACKGROUND_TASKS",
            Self::PingRequest { .. } => "PING_REQUEST",
            Self::AppVisibilityChange { .. } => "APP_VISIBILITY_CHANGE",
            Self::EmergencyWakeUp { .. } => "EMERGENCY_WAKE_UP",
            Self::DisplayNotifications { .. } => "DISPLAY_NOTIFICATIONS",
            Self::SubscriptionRefreshed { .. } => "SUBSCRIPTION_REFRESHED",
        }
    }
}

/// Worker -> page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum WorkerSignal {
    PongResponse {
        timestamp: u64,
    },
    PushSubscriptionMissing,
    PushSubscriptionStale,
    ForceReinitialize {
        #[serde(default)]
        reason: String,
    },
    #[serde(rename = "SERVICE_WORKER_WAKE_UP_CALL")]
    WakeUpCall {
        silent_duration_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_uses_screaming_tag() {
        let json = serde_json::to_value(WorkerMessage::PingRequest { timestamp: 42 }).unwrap();
        assert_eq!(json["type"], "PING_REQUEST");
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn visibility_change_fields_are_camel_case() {
        let msg = WorkerMessage::AppVisibilityChange {
            is_visible: true,
            dormant_ms: Some(31_000),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "APP_VISIBILITY_CHANGE");
        assert_eq!(json["isVisible"], true);
        assert_eq!(json["dormantMs"], 31_000);
        assert_eq!(msg.kind(), "APP_VISIBILITY_CHANGE");
    }

    #[test]
    fn hidden_visibility_change_omits_dormancy() {
        let msg = WorkerMessage::AppVisibilityChange {
            is_visible: false,
            dormant_ms: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("dormantMs").is_none());
    }

    #[test]
    fn worker_signals_parse_from_script_json() {
        let wake: WorkerSignal = serde_json::from_str(
            r#"{"type":"SERVICE_WORKER_WAKE_UP_CALL","silentDurationMs":90000}"#,
        )
        .unwrap();
        assert_eq!(
            wake,
            WorkerSignal::WakeUpCall {
                silent_duration_ms: 90_000
            }
        );

        let missing: WorkerSignal =
            serde_json::from_str(r#"{"type":"PUSH_SUBSCRIPTION_MISSING"}"#).unwrap();
        assert_eq!(missing, WorkerSignal::PushSubscriptionMissing);

        let reinit: WorkerSignal =
            serde_json::from_str(r#"{"type":"FORCE_REINITIALIZE"}"#).unwrap();
        assert_eq!(
            reinit,
            WorkerSignal::ForceReinitialize {
                reason: String::new()
            }
        );
    }

    #[test]
    fn display_notifications_carries_payloads() {
        let msg = WorkerMessage::DisplayNotifications {
            notifications: vec![PendingNotification {
                id: "n1".into(),
                title: "New booking".into(),
                body: "Table 4, 19:30".into(),
                tag: None,
                data: serde_json::Value::Null,
            }],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["notifications"][0]["title"], "New booking");
        assert!(json["notifications"][0].get("data").is_none());
    }

    #[test]
    fn unknown_signal_type_is_rejected() {
        let parsed: Result<WorkerSignal, _> = serde_json::from_str(r#"{"type":"SOMETHING_ELSE"}"#);
        assert!(parsed.is_err());
    }
}
