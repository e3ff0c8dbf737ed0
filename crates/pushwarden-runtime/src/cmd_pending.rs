//! `pushwarden pending`: one pending-notification query.

use pushwarden_runtime::http::HttpNotificationServer;
use pushwarden_runtime::platform::NotificationServer;

use crate::cli::PendingOpts;

pub async fn cmd_pending(opts: &PendingOpts) -> anyhow::Result<i32> {
    let server = HttpNotificationServer::new(reqwest::Client::new(), opts.server.clone());
    let notifications = server
        .pending_notifications(&opts.tenant, opts.since_ms, &opts.source)
        .await?;
    tracing::info!(count = notifications.len(), "pending check complete");
    println!("{}", serde_json::to_string_pretty(&notifications)?);
    Ok(0)
}
