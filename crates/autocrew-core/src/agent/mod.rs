//! Agent execution for autocrew
//!
//! ## Contract
//! - `Agent` - one concrete AI CLI backend behind an object-safe trait
//! - `RunOptions` / `AgentOutput` - per-invocation inputs and captured output
//! - `RunError` - failure classification that still carries partial output
//!
//! ## Capabilities
//! - `Configurable` - backend reads an MCP-server manifest written before the first run
//! - `HttpServerCapable` - backend can expose an HTTP control surface
//!
//! ## Construction
//! Agents are only built through [`registry::create_agent`], which maps a
//! backend tag onto the closed [`BackendKind`] set.

pub mod backends;
pub mod registry;
mod runner;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::process::{CommandSpec, ProcessError};

pub use backends::{Backend, BackendKind, ClaudeBackend, CodexBackend, DebugBackend, OpenCodeBackend};
pub use registry::{create_agent, create_agent_with_runner, AgentSpec, RegistryError};
pub use runner::CliAgent;

/// Per-invocation options, built by the monitor for every run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Total attempts; zero is treated as one
    pub max_retries: u32,
    /// Ask the backend to continue its previous session
    pub continue_mode: bool,
    pub working_directory: PathBuf,
    pub output_format: Option<String>,
    pub verbose: bool,
    /// Validate configuration only, never spawn the backend
    pub dry_run: bool,
}

impl RunOptions {
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Captured output of an agent run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent run cancelled")]
    Cancelled,
    #[error("`{command}` exited with {}", exit_description(.code))]
    Exited { command: String, code: Option<i32> },
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("agent failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AgentError>,
    },
    #[error("{backend} CLI `{binary}` is not available. {hint}")]
    Unavailable {
        backend: BackendKind,
        binary: String,
        hint: String,
    },
    #[error("failed to read {backend} version: {message}")]
    Version {
        backend: BackendKind,
        message: String,
    },
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            AgentError::Cancelled => true,
            AgentError::Process(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// A failed run: the classified error plus whatever output was captured
#[derive(Debug)]
pub struct RunError {
    pub output: AgentOutput,
    pub error: AgentError,
}

impl RunError {
    pub fn new(output: AgentOutput, error: AgentError) -> Self {
        Self { output, error }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// One AI backend wrapped as an executor
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Backend type tag
    fn backend(&self) -> BackendKind;

    /// Run the backend on `prompt`, retrying failed attempts with linear backoff
    async fn run(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        options: &RunOptions,
    ) -> Result<AgentOutput, RunError>;

    fn is_available(&self) -> bool {
        self.check_availability().is_ok()
    }

    /// Resolve the backend binary, or explain how to install it
    fn check_availability(&self) -> Result<PathBuf, AgentError>;

    async fn version(&self, cancel: &CancellationToken) -> Result<String, AgentError>;

    /// Shell command that installs the backend CLI, if it can be installed unattended
    fn install_command(&self) -> Option<CommandSpec> {
        None
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        None
    }

    fn as_http_server(&self) -> Option<&dyn HttpServerCapable> {
        None
    }
}

/// Backend needs an MCP-server manifest written before its first run
#[async_trait]
pub trait Configurable: Send + Sync {
    /// Manifest under the worker's private directory
    fn manifest_path(&self) -> PathBuf;

    /// Manifest inside a project checkout
    fn project_manifest_path(&self, project_dir: &Path) -> PathBuf;

    /// Write the worker manifest, returning its path
    async fn configure(&self) -> anyhow::Result<PathBuf>;

    /// Write the project manifest, returning its path
    async fn configure_for_project(&self, project_dir: &Path) -> anyhow::Result<PathBuf>;
}

/// Backend can serve an HTTP control surface
pub trait HttpServerCapable: Send + Sync {
    fn server_command(&self, port: u16, working_dir: &Path, api_key: Option<&str>) -> CommandSpec;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_coerces_zero() {
        let options = RunOptions::default();
        assert_eq!(options.attempts(), 1);
        let options = RunOptions {
            max_retries: 4,
            ..Default::default()
        };
        assert_eq!(options.attempts(), 4);
    }

    #[test]
    fn test_exhausted_message_names_attempts_and_cause() {
        let err = AgentError::RetriesExhausted {
            attempts: 3,
            source: Box::new(AgentError::Exited {
                command: "claude --print".into(),
                code: Some(2),
            }),
        };
        let message = err.to_string();
        assert!(message.contains("3 attempt(s)"));
        assert!(message.contains("status 2"));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_process_counts_as_cancellation() {
        let err = AgentError::Process(ProcessError::Cancelled {
            command: "codex".into(),
        });
        assert!(err.is_cancelled());
    }
}
