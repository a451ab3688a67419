//! autocrew - autonomous coding agent worker
//!
//! One process per worker container:
//! - `autocrew run` polls the tracker and drives the configured AI CLI
//! - `autocrew hooks <event>` runs lifecycle hooks from the container entrypoint
//! - `autocrew check` / `configure` / `serve` manage the backend itself
//!
//! All settings come from the environment and are resolved once at startup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use autocrew_core::agent::create_agent;
use autocrew_core::hooks::{HookEvent, HookExecutor};
use autocrew_core::WorkerConfig;

mod run;
mod serve;

/// autocrew - autonomous coding agent worker
#[derive(Parser)]
#[command(name = "autocrew", version)]
#[command(about = "Poll a tracker for pending work and drive an AI coding CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor loop until interrupted
    ///
    /// Resolves the polling identity and default branch, checks for pending
    /// work immediately and then every CHECK_INTERVAL seconds.
    Run {
        /// Run a single check and exit
        #[arg(long)]
        once: bool,

        /// Sync the workspace but never spawn the agent
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the lifecycle hooks bound to one event
    Hooks {
        /// init, start, stop or error
        event: HookEvent,
    },

    /// Report availability and version of the configured backend
    Check,

    /// Write the MCP-server manifest for the configured backend
    Configure {
        /// Write the project manifest inside this checkout instead
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// Expose the backend's HTTP control surface
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 4096)]
        port: u16,

        /// Require this key from clients
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = WorkerConfig::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.debug));
    let config = config.context("Invalid worker configuration")?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    match cli.command {
        Commands::Run { once, dry_run } => run::run(config, once, dry_run, &cancel).await,
        Commands::Hooks { event } => {
            HookExecutor::new(config.hooks.clone())
                .execute_hooks(event, &cancel)
                .await?;
            Ok(())
        }
        Commands::Check => check(&config, &cancel).await,
        Commands::Configure { project } => configure(&config, project).await,
        Commands::Serve { port, api_key } => {
            serve::run(&config, port, api_key.as_deref(), &cancel).await
        }
    }
}

/// Log to stdout; RUST_LOG directives are added on top of the default level
fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .init();
}

/// Cancel the root token on Ctrl-C or SIGTERM
async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
    cancel.cancel();
}

async fn check(config: &WorkerConfig, cancel: &CancellationToken) -> Result<()> {
    let agent = create_agent(config.agent_spec())?;

    println!("Agent:   {} ({})", agent.name(), agent.backend());
    match agent.check_availability() {
        Ok(path) => println!("Binary:  {}", path.display()),
        Err(e) => {
            println!("Binary:  missing");
            return Err(e.into());
        }
    }

    let version = agent.version(cancel).await?;
    println!("Version: {}", version);
    Ok(())
}

async fn configure(config: &WorkerConfig, project: Option<PathBuf>) -> Result<()> {
    let agent = create_agent(config.agent_spec())?;
    let Some(configurable) = agent.as_configurable() else {
        println!("{} backend does not use an MCP manifest", agent.backend());
        return Ok(());
    };

    let path = match project {
        Some(dir) => configurable.configure_for_project(&dir).await?,
        None => configurable.configure().await?,
    };
    println!(
        "Wrote {} MCP server(s) to {}",
        config.mcp_servers.len(),
        path.display()
    );
    Ok(())
}
