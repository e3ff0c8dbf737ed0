//! HTTP adapters: the health probe target and the notification server client.

use async_trait::async_trait;
use pushwarden_core::{PendingNotification, PushSubscription};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::error::LivenessError;
use crate::platform::{NotificationServer, ProbeTarget};

const REFRESH_PATH: &str = "/subscriptions/refresh";
const PENDING_PATH: &str = "/notifications/pending";

fn join(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

fn check_status(response: Response) -> Result<Response, LivenessError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(LivenessError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

/// `HEAD` against a cheap endpoint. Any 2xx counts as alive.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProbeTarget for HttpProbe {
    async fn probe(&self) -> Result<(), LivenessError> {
        let response = self.client.head(&self.url).send().await?;
        check_status(response)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    tenant_id: &'a str,
    subscription: &'a PushSubscription,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingRequest<'a> {
    tenant_id: &'a str,
    since: i64,
    source: &'a str,
}

#[derive(Debug, Deserialize)]
struct PendingResponse {
    #[serde(default)]
    notifications: Vec<PendingNotification>,
}

/// JSON client for the notification server.
pub struct HttpNotificationServer {
    client: Client,
    base_url: String,
}

impl HttpNotificationServer {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl NotificationServer for HttpNotificationServer {
    async fn refresh_subscription(
        &self,
        tenant_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), LivenessError> {
        let url = join(&self.base_url, REFRESH_PATH);
        let body = RefreshRequest {
            tenant_id,
            subscription,
        };
        let response = self.client.post(&url).json(&body).send().await?;
        check_status(response)?;
        tracing::debug!(%url, endpoint = %subscription.endpoint, "subscription refreshed on server");
        Ok(())
    }

    async fn pending_notifications(
        &self,
        tenant_id: &str,
        since_ms: i64,
        source: &str,
    ) -> Result<Vec<PendingNotification>, LivenessError> {
        let url = join(&self.base_url, PENDING_PATH);
        let body = PendingRequest {
            tenant_id,
            since: since_ms,
            source,
        };
        let response = self.client.post(&url).json(&body).send().await?;
        let parsed: PendingResponse = check_status(response)?.json().await?;
        Ok(parsed.notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::subscription;

    #[test]
    fn join_tolerates_trailing_slash() {
        assert_eq!(join("https://api.test/", PENDING_PATH), "https://api.test/notifications/pending");
        assert_eq!(join("https://api.test", REFRESH_PATH), "https://api.test/subscriptions/refresh");
    }

    #[test]
    fn refresh_body_is_camel_case() {
        let sub = subscription("https://push/a", Some(1_700_000_000_000));
        let body = RefreshRequest {
            tenant_id: "t-1",
            subscription: &sub,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["tenantId"], "t-1");
        assert_eq!(json["subscription"]["endpoint"], "https://push/a");
        assert_eq!(json["subscription"]["expirationTime"], 1_700_000_000_000_i64);
        assert_eq!(json["subscription"]["keys"]["auth"], "c2VjcmV0");
    }

    #[test]
    fn pending_body_and_response_shapes() {
        let body = PendingRequest {
            tenant_id: "t-1",
            since: 42,
            source: "recovery",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"tenantId": "t-1", "since": 42, "source": "recovery"}));

        let parsed: PendingResponse = serde_json::from_str(
            r#"{"notifications":[{"id":"n1","title":"New booking","body":"Table 4"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.notifications.len(), 1);
        assert_eq!(parsed.notifications[0].title, "New booking");

        let empty: PendingResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.notifications.is_empty());
    }

    #[tokio::test]
    async fn unreachable_probe_is_an_error() {
        let probe = HttpProbe::new(Client::new(), "http://127.0.0.1:9/health");
        assert!(matches!(probe.probe().await, Err(LivenessError::Http(_))));
    }
}
