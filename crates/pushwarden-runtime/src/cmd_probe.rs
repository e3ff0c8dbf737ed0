//! `pushwarden probe`: one timed HEAD request.

use std::sync::Arc;
use std::time::Duration;

use pushwarden_core::LivenessConfig;
use pushwarden_runtime::HealthProber;
use pushwarden_runtime::http::HttpProbe;

use crate::cli::ProbeOpts;

/// Prints the probe result; exit code 1 when the target is unhealthy.
pub async fn cmd_probe(config: &LivenessConfig, opts: &ProbeOpts) -> anyhow::Result<i32> {
    let timeout_ms = opts.timeout_ms.unwrap_or(config.probe_timeout_ms);
    let target = HttpProbe::new(reqwest::Client::new(), opts.url.clone());
    let prober = HealthProber::new(Arc::new(target), Duration::from_millis(timeout_ms));

    let result = prober.probe().await;
    println!("{}", serde_json::to_string(&result)?);
    Ok(if result.ok { 0 } else { 1 })
}
