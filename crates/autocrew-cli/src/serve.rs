//! `autocrew serve` - run the backend's own HTTP control surface
//!
//! The server process inherits stdio and runs until it exits or the worker
//! is interrupted, in which case it is killed.

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use autocrew_core::agent::create_agent;
use autocrew_core::WorkerConfig;

pub async fn run(
    config: &WorkerConfig,
    port: u16,
    api_key: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let agent = create_agent(config.agent_spec())?;
    let Some(server) = agent.as_http_server() else {
        bail!("{} backend has no HTTP server mode", agent.backend());
    };
    agent.check_availability()?;

    let spec = server.server_command(port, &config.workspace_dir, api_key);
    tracing::info!(
        agent = agent.name(),
        port,
        auth = api_key.is_some(),
        command = %spec.display(),
        "Starting backend server"
    );

    let mut child = spec
        .to_command()
        .spawn()
        .with_context(|| format!("Failed to start {}", spec.display()))?;

    tokio::select! {
        status = child.wait() => {
            let status = status.context("Failed to wait for backend server")?;
            if !status.success() {
                bail!("Backend server exited with {}", status);
            }
        }
        _ = cancel.cancelled() => {
            tracing::info!("Stopping backend server");
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to stop backend server: {}", e);
            }
        }
    }

    Ok(())
}
