//! Workspace provider
//!
//! The on-disk checkout the agent operates against. Each worker owns its
//! workspace exclusively; the monitor resets it to the remote default branch
//! before every agent run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::process::{CommandSpec, ProcessRunner, TokioProcessRunner};

const GIT_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait Workspace: Send + Sync {
    /// Fetch, check out and hard-reset `branch` to its remote tip
    async fn switch_to_main_branch(&self, cancel: &CancellationToken, branch: &str) -> Result<()>;

    fn working_directory(&self) -> &Path;
}

/// Git checkout with an `origin` remote
pub struct GitWorkspace {
    root: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl GitWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_runner(root, Arc::new(TokioProcessRunner))
    }

    pub fn with_runner(root: impl Into<PathBuf>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }

    async fn run_git(&self, args: &[&str], cancel: &CancellationToken) -> Result<String> {
        let spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .current_dir(&self.root)
            .envs([("GIT_TERMINAL_PROMPT", "0")])
            .timeout(GIT_TIMEOUT);

        let output = self.runner.run(&spec, cancel).await.with_context(|| {
            format!(
                "Failed to execute git {} in {}",
                args.join(" "),
                self.root.display()
            )
        })?;

        if output.success() {
            Ok(output.stdout)
        } else {
            let detail = command_error_detail(&output.stdout, &output.stderr);
            Err(anyhow!("git {} failed: {}", args.join(" "), detail))
        }
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn switch_to_main_branch(&self, cancel: &CancellationToken, branch: &str) -> Result<()> {
        let remote_ref = format!("origin/{}", branch);
        tracing::info!(branch, dir = %self.root.display(), "Syncing workspace");

        self.run_git(&["fetch", "origin", branch], cancel).await?;
        self.run_git(&["checkout", "--force", branch], cancel).await?;
        self.run_git(&["reset", "--hard", &remote_ref], cancel).await?;
        Ok(())
    }

    fn working_directory(&self) -> &Path {
        &self.root
    }
}

fn command_error_detail(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    "unknown git error".to_string()
}
