//! Pending-notification backstop for missed push deliveries.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use pushwarden_core::WorkerMessage;

use crate::error::LivenessError;
use crate::lock;
use crate::platform::{NotificationServer, WorkerBridge};

pub struct PendingPoller {
    server: Arc<dyn NotificationServer>,
    worker: Arc<dyn WorkerBridge>,
    tenant_id: String,
    source: String,
    /// Epoch milliseconds of the last successful check.
    last_check_ms: Mutex<i64>,
}

impl PendingPoller {
    pub fn new(
        server: Arc<dyn NotificationServer>,
        worker: Arc<dyn WorkerBridge>,
        tenant_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            server,
            worker,
            tenant_id: tenant_id.into(),
            source: source.into(),
            last_check_ms: Mutex::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn last_check_ms(&self) -> i64 {
        *lock(&self.last_check_ms)
    }

    /// Poll once and hand anything found to the worker for display.
    /// Returns how many notifications were forwarded.
    pub async fn check(&self) -> Result<usize, LivenessError> {
        let since_ms = self.last_check_ms();
        let started_ms = Utc::now().timestamp_millis();
        let notifications = self
            .server
            .pending_notifications(&self.tenant_id, since_ms, &self.source)
            .await?;

        let count = notifications.len();
        if count > 0 {
            tracing::info!(count, since_ms, "forwarding pending notifications");
            self.worker
                .post(WorkerMessage::DisplayNotifications { notifications })
                .await?;
        } else {
            tracing::debug!(since_ms, "no pending notifications");
        }
        *lock(&self.last_check_ms) = started_ms;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeServer, FakeWorker, pending_notification};

    #[tokio::test]
    async fn forwards_results_and_advances_timestamp() {
        let server = Arc::new(FakeServer::default());
        let worker = Arc::new(FakeWorker::default());
        server.queue_pending(vec![pending_notification("n1"), pending_notification("n2")]);
        let poller = PendingPoller::new(server.clone(), worker.clone(), "tenant-1", "recovery");
        let before = poller.last_check_ms();

        assert_eq!(poller.check().await.unwrap(), 2);
        assert_eq!(worker.posted_kinds(), vec!["DISPLAY_NOTIFICATIONS"]);
        assert!(poller.last_check_ms() >= before);
        assert_eq!(server.pending_queries(), vec![("tenant-1".to_string(), before)]);
    }

    #[tokio::test]
    async fn empty_result_posts_nothing() {
        let server = Arc::new(FakeServer::default());
        let worker = Arc::new(FakeWorker::default());
        let poller = PendingPoller::new(server, worker.clone(), "tenant-1", "online");
        assert_eq!(poller.check().await.unwrap(), 0);
        assert!(worker.posted().is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_timestamp() {
        let server = Arc::new(FakeServer::default());
        let worker = Arc::new(FakeWorker::default());
        server.set_pending_failing(true);
        let poller = PendingPoller::new(server, worker, "tenant-1", "online");
        let before = poller.last_check_ms();
        assert!(poller.check().await.is_err());
        assert_eq!(poller.last_check_ms(), before);
    }
}
