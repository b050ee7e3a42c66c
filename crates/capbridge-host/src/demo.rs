//! Minimal client context, run as the child of `capbridge run`
//!
//! Selects a file through the host, watches it, and logs every update event
//! until the host goes away.

use capbridge_core::{BridgeConfig, CapabilityBridge, ClientContext, HostConnection};
use std::sync::Arc;
use tracing::info;

pub async fn run_client_demo(config: &BridgeConfig, watch: bool) -> anyhow::Result<()> {
    let connection = Arc::new(HostConnection::stdio());
    let bridge = CapabilityBridge::from_config(connection, config);
    let mut context = ClientContext::new(bridge);

    let subscription = context.register_update_listener(|payload| {
        info!(bytes = payload.len(), "update: {}", payload.to_string_lossy());
    })?;

    match context.open_file_dialog().await? {
        Some(path) => {
            info!("Selected {}", path);
            if watch {
                context.watch(&path)?;
            }
        }
        None => {
            info!("Dialog cancelled");
            return Ok(());
        }
    }

    tokio::select! {
        _ = subscription.closed() => info!("Host closed the update stream"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    Ok(())
}
