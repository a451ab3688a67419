//! Generic CLI agent: process spawning, retries, and backoff for any [`Backend`]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backends::{ArgContext, Backend, BackendKind};
use super::{
    Agent, AgentError, AgentOutput, Configurable, HttpServerCapable, RunError, RunOptions,
};
use crate::mcp::{self, McpServers};
use crate::paths;
use crate::process::{truncate_for_log, CommandSpec, ProcessOutput, ProcessRunner};

/// Backoff grows by one unit per failed attempt (1, 2, 3, ...)
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

/// An [`Agent`] that drives one CLI backend, one process per attempt
pub struct CliAgent<B: Backend> {
    backend: B,
    name: String,
    binary: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    mcp_servers: McpServers,
    /// Private directory of this agent (<home>/agents/<name>)
    agent_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    backoff_unit: Duration,
}

impl<B: Backend> CliAgent<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: B,
        name: impl Into<String>,
        binary: Option<String>,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        mcp_servers: McpServers,
        home: &Path,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let name = name.into();
        let binary = binary
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| backend.default_binary().to_string());
        let agent_dir = paths::agent_dir(home, &name);
        Self {
            backend,
            name,
            binary,
            args,
            env,
            mcp_servers,
            agent_dir,
            runner,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }

    /// Override the backoff unit (tests use milliseconds)
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Manifest passed to the backend, only when servers are declared
    fn active_manifest(&self) -> Option<PathBuf> {
        if self.mcp_servers.is_empty() {
            return None;
        }
        self.backend.manifest_path(&self.agent_dir)
    }

    fn command_spec(&self, prompt: &str, options: &RunOptions, attempt: u32) -> CommandSpec {
        let manifest = self.active_manifest();
        let ctx = ArgContext {
            options,
            attempt,
            extra_args: &self.args,
            mcp_manifest: manifest.as_deref(),
        };

        let mut spec = CommandSpec::new(&self.binary)
            .args(self.backend.build_args(&ctx))
            .envs(self.env.clone())
            .envs(self.backend.run_env(&ctx))
            .stdin(prompt);
        if !options.working_directory.as_os_str().is_empty() {
            spec = spec.current_dir(&options.working_directory);
        }
        spec
    }
}

impl From<ProcessOutput> for AgentOutput {
    fn from(output: ProcessOutput) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

#[async_trait]
impl<B: Backend> Agent for CliAgent<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        options: &RunOptions,
    ) -> Result<AgentOutput, RunError> {
        if options.dry_run {
            info!(
                agent = %self.name,
                backend = %self.backend.kind(),
                prompt_len = prompt.len(),
                "Dry run, not invoking agent"
            );
            return Ok(AgentOutput::default());
        }

        let max_attempts = options.attempts();
        let mut output = AgentOutput::default();
        let mut attempt = 1;

        loop {
            let spec = self.command_spec(prompt, options, attempt);
            let command = spec.display();
            info!(
                agent = %self.name,
                attempt,
                max_attempts,
                command = %command,
                "Starting agent run"
            );
            let started = Instant::now();

            let failure = match self.runner.run(&spec, cancel).await {
                Ok(result) if result.success() => {
                    info!(
                        agent = %self.name,
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Agent run succeeded"
                    );
                    debug!(agent = %self.name, stdout = %truncate_for_log(&result.stdout), "Agent output");
                    return Ok(result.into());
                }
                Ok(result) => {
                    let code = result.exit_code;
                    output = result.into();
                    AgentError::Exited { command, code }
                }
                Err(e) if e.is_cancelled() => {
                    info!(agent = %self.name, attempt, "Agent run cancelled");
                    return Err(RunError::new(output, AgentError::Cancelled));
                }
                Err(e) => AgentError::Process(e),
            };

            warn!(
                agent = %self.name,
                attempt,
                max_attempts,
                duration_ms = started.elapsed().as_millis() as u64,
                stderr = %truncate_for_log(&output.stderr),
                "Agent attempt failed: {}",
                failure
            );

            if cancel.is_cancelled() {
                return Err(RunError::new(output, AgentError::Cancelled));
            }

            if attempt >= max_attempts {
                return Err(RunError::new(
                    output,
                    AgentError::RetriesExhausted {
                        attempts: max_attempts,
                        source: Box::new(failure),
                    },
                ));
            }

            let delay = self.backoff_unit * attempt;
            debug!(agent = %self.name, attempt, delay_ms = delay.as_millis() as u64, "Backing off");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RunError::new(output, AgentError::Cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    fn check_availability(&self) -> Result<PathBuf, AgentError> {
        which::which(&self.binary).map_err(|_| AgentError::Unavailable {
            backend: self.backend.kind(),
            binary: self.binary.clone(),
            hint: self.backend.install_hint(),
        })
    }

    async fn version(&self, cancel: &CancellationToken) -> Result<String, AgentError> {
        let spec = CommandSpec::new(&self.binary)
            .args(self.backend.version_args())
            .timeout(VERSION_TIMEOUT);
        let spec = if self.backend.kind() == BackendKind::Debug {
            // `cat` has no --version flag; echo a fixed marker instead
            spec.stdin(format!("{}-debug", env!("CARGO_PKG_VERSION")))
        } else {
            spec
        };

        let output = self.runner.run(&spec, cancel).await?;
        if !output.success() {
            return Err(AgentError::Version {
                backend: self.backend.kind(),
                message: output.combined().trim().to_string(),
            });
        }

        output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| AgentError::Version {
                backend: self.backend.kind(),
                message: "empty version output".to_string(),
            })
    }

    fn install_command(&self) -> Option<CommandSpec> {
        self.backend.install_script().map(CommandSpec::shell)
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        self.backend
            .manifest_path(&self.agent_dir)
            .map(|_| self as &dyn Configurable)
    }

    fn as_http_server(&self) -> Option<&dyn HttpServerCapable> {
        self.backend
            .server_invocation(0, None)
            .map(|_| self as &dyn HttpServerCapable)
    }
}

#[async_trait]
impl<B: Backend> Configurable for CliAgent<B> {
    fn manifest_path(&self) -> PathBuf {
        self.backend
            .manifest_path(&self.agent_dir)
            .unwrap_or_else(|| self.agent_dir.join("mcp.json"))
    }

    fn project_manifest_path(&self, project_dir: &Path) -> PathBuf {
        self.backend
            .project_manifest_path(project_dir)
            .unwrap_or_else(|| project_dir.join(".mcp.json"))
    }

    async fn configure(&self) -> anyhow::Result<PathBuf> {
        let path = self.manifest_path();
        mcp::write_manifest(&path, &self.mcp_servers).await?;
        Ok(path)
    }

    async fn configure_for_project(&self, project_dir: &Path) -> anyhow::Result<PathBuf> {
        let path = self.project_manifest_path(project_dir);
        mcp::write_manifest(&path, &self.mcp_servers).await?;
        Ok(path)
    }
}

impl<B: Backend> HttpServerCapable for CliAgent<B> {
    fn server_command(&self, port: u16, working_dir: &Path, api_key: Option<&str>) -> CommandSpec {
        let (args, env) = self
            .backend
            .server_invocation(port, api_key)
            .unwrap_or_default();
        CommandSpec::new(&self.binary)
            .args(args)
            .envs(self.env.clone())
            .envs(env)
            .current_dir(working_dir)
    }
}
