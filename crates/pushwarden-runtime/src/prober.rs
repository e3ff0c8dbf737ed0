//! Health prober: one cheap round trip, bounded by a timeout.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::platform::ProbeTarget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct HealthProber {
    target: Arc<dyn ProbeTarget>,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(target: Arc<dyn ProbeTarget>, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// Never fails: errors and timeouts come back as `ok = false`.
    pub async fn probe(&self) -> ProbeResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.target.probe()).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {}ms", self.timeout.as_millis())),
        };
        match &error {
            None => tracing::debug!(latency_ms, "probe ok"),
            Some(reason) => tracing::warn!(latency_ms, %reason, "probe failed"),
        }
        ProbeResult {
            ok: error.is_none(),
            latency_ms,
            error,
        }
    }
}
