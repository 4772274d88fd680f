//! Thin runnable wrapper around `mcpg-config` and `mcpg-hub`: reads a
//! gateway configuration from stdin, starts the gateway, and runs until
//! interrupted. It deliberately does not parse command-line flags beyond
//! what `std::env` already gives it — flag parsing belongs to the
//! external front server, not the core.

use std::sync::Arc;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = Arc::new(mcpg_config::load_from_stdin().await?);

    let probe_result = mcpg_hub::probe_environment(&config).await;
    for warning in &probe_result.warnings {
        tracing::warn!(%warning, "environment probe warning");
    }
    for error in &probe_result.errors {
        tracing::error!(%error, "environment probe error");
    }

    let gateway = mcpg_hub::start_gateway(config);
    tracing::info!(backends = ?gateway.server_ids(), "gateway started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, closing backends");
    gateway.shutdown().await;

    Ok(())
}
