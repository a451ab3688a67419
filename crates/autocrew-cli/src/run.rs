//! `autocrew run` - wire the configured agent into the monitor loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;

use autocrew_core::agent::{create_agent, Agent};
use autocrew_core::hooks::{HookEvent, HookExecutor};
use autocrew_core::monitor::{Monitor, MonitorError, TickOutcome};
use autocrew_core::process::{truncate_for_log, ProcessRunner, TokioProcessRunner};
use autocrew_core::tracker::GitHubClient;
use autocrew_core::workspace::GitWorkspace;
use autocrew_core::WorkerConfig;

const INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

pub async fn run(
    mut config: WorkerConfig,
    once: bool,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    config.dry_run |= dry_run;
    let hooks = HookExecutor::new(config.hooks.clone());

    match start(&config, once, cancel).await {
        Ok(()) => Ok(()),
        Err(e) if cancel.is_cancelled() => {
            tracing::info!("Stopped: {:#}", e);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Worker failed: {:#}", e);
            // Shutdown signals must not cut the error hooks short
            if let Err(hook_err) = hooks
                .execute_hooks(HookEvent::Error, &CancellationToken::new())
                .await
            {
                tracing::warn!("Error hooks failed: {}", hook_err);
            }
            Err(e)
        }
    }
}

async fn start(config: &WorkerConfig, once: bool, cancel: &CancellationToken) -> Result<()> {
    let agent = create_agent(config.agent_spec())?;
    tracing::info!(
        agent = agent.name(),
        backend = %agent.backend(),
        dry_run = config.dry_run,
        "Starting worker"
    );

    if !config.dry_run {
        ensure_installed(agent.as_ref(), config.install_deps, cancel).await?;
    }

    if let Some(configurable) = agent.as_configurable() {
        if !config.mcp_servers.is_empty() {
            configurable
                .configure()
                .await
                .context("Failed to write MCP manifest")?;
        }
    }

    let settings = config.tracker()?;
    let tracker = Arc::new(GitHubClient::new(&settings.api_url, &settings.token)?);
    let workspace = Arc::new(GitWorkspace::new(&config.workspace_dir));
    let monitor = Monitor::new(
        config.monitor_settings(),
        tracker,
        settings.repository,
        agent,
        workspace,
    );

    if once {
        match monitor.run_once(cancel).await? {
            TickOutcome::Idle => tracing::info!("Nothing to do"),
            TickOutcome::Ran { items } => tracing::info!(items, "Agent run finished"),
        }
        return Ok(());
    }

    match monitor.start(cancel).await {
        Ok(()) | Err(MonitorError::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Install the backend CLI when it is missing and installs are allowed
async fn ensure_installed(
    agent: &dyn Agent,
    install_deps: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let missing = match agent.check_availability() {
        Ok(path) => {
            tracing::debug!(binary = %path.display(), "Backend available");
            return Ok(());
        }
        Err(e) => e,
    };

    let install = match agent.install_command() {
        Some(install) if install_deps => install.timeout(INSTALL_TIMEOUT),
        _ => return Err(missing.into()),
    };

    tracing::info!(command = %install.display(), "Installing backend CLI");
    let output = TokioProcessRunner
        .run(&install, cancel)
        .await
        .context("Failed to run backend install command")?;
    if !output.success() {
        return Err(anyhow!(
            "Backend install failed ({}): {}",
            install.display(),
            truncate_for_log(output.combined().trim())
        ));
    }

    let path = agent
        .check_availability()
        .context("Backend still unavailable after install")?;
    tracing::info!(binary = %path.display(), "Backend installed");
    Ok(())
}
