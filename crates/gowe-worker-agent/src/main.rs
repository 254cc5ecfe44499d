//! Remote worker agent entrypoint (spec §4.6): registers with a
//! `gowe-api` server, then runs a heartbeat loop and a checkout/execute/
//! report poll loop side by side until shutdown, mirroring
//! `gowe-api::main`'s load-config -> bootstrap -> run -> graceful-
//! shutdown shape on the client side of the same protocol.

mod client;
mod config;
mod error;
mod exec;
mod poller;

use std::sync::Arc;

use gowe_core::HeartbeatInstruction;
use tokio::sync::watch;

use crate::client::AgentClient;
use crate::config::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AgentConfig::from_env()?;
    tracing::info!(server_url = %config.server_url, name = %config.name, group = %config.group, "starting gowe-worker-agent");

    let client = Arc::new(AgentClient::new(config.server_url.clone()));
    let worker = client
        .register(&config.name, &config.host, &config.group, &config.runtime_tag, &config.capabilities)
        .await?;
    tracing::info!(worker_id = %worker.id, "registered with server");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (instruction_tx, instruction_rx) = watch::channel(HeartbeatInstruction::Continue);

    let heartbeat_handle = tokio::spawn(poller::heartbeat_loop(
        client.clone(),
        worker.id,
        config.heartbeat_interval,
        instruction_tx,
        shutdown_rx.clone(),
    ));

    let poll_handle = tokio::spawn(poller::Poller::new(client.clone(), worker.id, &config).run(shutdown_rx, instruction_rx));

    shutdown_signal().await;
    tracing::info!("shutdown signal received; draining");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(heartbeat_handle, poll_handle);

    if let Err(e) = client.deregister(worker.id).await {
        tracing::warn!(error = %e, "deregistration failed on shutdown");
    }

    Ok(())
}

/// Waits for SIGINT (ctrl-c) or, on unix, SIGTERM — the same dual-signal
/// shutdown trigger `gowe-api::main` listens for.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
