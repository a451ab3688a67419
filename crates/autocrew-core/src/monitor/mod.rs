//! The worker control loop
//!
//! `Monitor::start` resolves the polling identity and the default branch
//! once, runs one check immediately, then checks again on every tick of a
//! fixed interval until cancelled. A tick:
//!
//! 1. aggregates pending items (nothing else happens when there are none)
//! 2. formats the digest
//! 3. resets the workspace to the remote default branch
//! 4. assembles the prompt
//! 5. runs the agent
//!
//! Ticks run strictly one after another. A failed tick is logged and the
//! loop carries on; only cancellation ends it.

pub mod prompt;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{Agent, RunError, RunOptions};
use crate::process::truncate_for_log;
use crate::tracker::{PendingAggregator, PendingItems, RepoRef, Tracker};
use crate::workspace::Workspace;

pub use prompt::{build_prompt, format_pending_items, load_prompt_overrides, PromptSections};

/// Bounds applied to the polling period
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Immutable loop settings
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub max_retries: u32,
    pub dry_run: bool,
    pub verbose: bool,
    pub team_name: String,
    pub role_prompt: String,
    pub common_prompt: String,
}

impl MonitorSettings {
    /// Options for one agent run inside `working_directory`
    pub fn run_options(&self, working_directory: &Path) -> RunOptions {
        RunOptions {
            max_retries: self.max_retries,
            continue_mode: false,
            working_directory: working_directory.to_path_buf(),
            output_format: None,
            verbose: self.verbose,
            dry_run: self.dry_run,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            max_retries: 3,
            dry_run: false,
            verbose: false,
            team_name: String::new(),
            role_prompt: String::new(),
            common_prompt: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor cancelled")]
    Cancelled,
    #[error("failed to resolve the authenticated identity: {0:#}")]
    Identity(#[source] anyhow::Error),
    #[error("failed to resolve the default branch of {repo}: {source:#}")]
    DefaultBranch {
        repo: RepoRef,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Tick(#[from] TickError),
}

impl MonitorError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            MonitorError::Cancelled => true,
            MonitorError::Tick(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Why a single tick did not complete
#[derive(Debug, Error)]
pub enum TickError {
    #[error("tick cancelled")]
    Cancelled,
    #[error("failed to aggregate pending items: {0:#}")]
    Aggregate(#[source] anyhow::Error),
    #[error("failed to sync workspace: {0:#}")]
    Sync(#[source] anyhow::Error),
    #[error(transparent)]
    Agent(#[from] RunError),
}

impl TickError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            TickError::Cancelled => true,
            TickError::Agent(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Identity and branch resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No pending items
    Idle,
    /// The agent ran over `items` pending items
    Ran { items: usize },
}

pub struct Monitor {
    settings: MonitorSettings,
    tracker: Arc<dyn Tracker>,
    aggregator: PendingAggregator,
    agent: Arc<dyn Agent>,
    workspace: Arc<dyn Workspace>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        tracker: Arc<dyn Tracker>,
        repo: RepoRef,
        agent: Arc<dyn Agent>,
        workspace: Arc<dyn Workspace>,
    ) -> Self {
        Self {
            settings,
            aggregator: PendingAggregator::new(tracker.clone(), repo),
            tracker,
            agent,
            workspace,
        }
    }

    fn repo(&self) -> &RepoRef {
        self.aggregator.repo()
    }

    /// Resolve the polling identity and the default branch
    pub async fn resolve_session(&self, cancel: &CancellationToken) -> Result<Session, MonitorError> {
        let identity = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            result = self.tracker.authenticated_user() => result.map_err(MonitorError::Identity)?,
        };
        let default_branch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            result = self.tracker.default_branch(self.repo()) => {
                result.map_err(|source| MonitorError::DefaultBranch {
                    repo: self.repo().clone(),
                    source,
                })?
            }
        };

        info!(
            identity = %identity,
            repo = %self.repo(),
            branch = %default_branch,
            agent = self.agent.name(),
            team = %self.settings.team_name,
            "Monitor session resolved"
        );
        Ok(Session {
            identity,
            default_branch,
        })
    }

    /// Run until cancelled. Always ends with an error; cancellation yields
    /// [`MonitorError::Cancelled`].
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), MonitorError> {
        let session = self.resolve_session(cancel).await?;

        self.check_logged(&session, cancel).await;

        let interval = self
            .settings
            .check_interval
            .clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL);
        let now = tokio::time::Instant::now();
        let first = now.checked_add(interval).unwrap_or(now);
        let mut ticker = tokio::time::interval_at(first, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "Monitor loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Monitor loop stopping");
                    return Err(MonitorError::Cancelled);
                }
                _ = ticker.tick() => {
                    self.check_logged(&session, cancel).await;
                }
            }
        }
    }

    /// Resolve the session and run exactly one check
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<TickOutcome, MonitorError> {
        let session = self.resolve_session(cancel).await?;
        Ok(self.check(&session, cancel).await?)
    }

    async fn check_logged(&self, session: &Session, cancel: &CancellationToken) {
        match self.check(session, cancel).await {
            Ok(TickOutcome::Idle) => {}
            Ok(TickOutcome::Ran { items }) => info!(items, "Check complete"),
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                info!("Check interrupted by cancellation");
            }
            Err(e) => warn!("Check failed: {}", e),
        }
    }

    /// One tick of the loop
    pub async fn check(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<TickOutcome, TickError> {
        let items = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TickError::Cancelled),
            result = self.aggregator.fetch(&session.identity) => result.map_err(TickError::Aggregate)?,
        };

        if items.is_empty() {
            info!(identity = %session.identity, "No pending items");
            return Ok(TickOutcome::Idle);
        }

        let count = items.count();
        info!(
            review_requests = items.review_requests.len(),
            assigned_prs = items.assigned_prs.len(),
            assigned_issues = items.assigned_issues.len(),
            prs_with_changes = items.prs_with_changes.len(),
            "Found {} pending item(s)",
            count
        );

        let digest = format_pending_items(&items, &session.identity, &self.repo().to_string());

        self.workspace
            .switch_to_main_branch(cancel, &session.default_branch)
            .await
            .map_err(|e| {
                if cancel.is_cancelled() {
                    TickError::Cancelled
                } else {
                    TickError::Sync(e)
                }
            })?;

        let prompt = self.assemble_prompt(&digest).await;
        self.invoke_agent(&prompt, &items, cancel).await?;

        Ok(TickOutcome::Ran { items: count })
    }

    async fn assemble_prompt(&self, digest: &str) -> String {
        let overrides =
            load_prompt_overrides(self.workspace.working_directory(), self.agent.name()).await;
        build_prompt(&PromptSections {
            digest,
            role_prompt: &self.settings.role_prompt,
            common_prompt: &self.settings.common_prompt,
            overrides: &overrides,
        })
    }

    async fn invoke_agent(
        &self,
        prompt: &str,
        items: &PendingItems,
        cancel: &CancellationToken,
    ) -> Result<(), TickError> {
        let options = self
            .settings
            .run_options(self.workspace.working_directory());

        info!(
            agent = self.agent.name(),
            backend = %self.agent.backend(),
            items = items.count(),
            prompt_chars = prompt.len(),
            "Invoking agent"
        );
        let started = Instant::now();

        match self.agent.run(cancel, prompt, &options).await {
            Ok(output) => {
                info!(
                    agent = self.agent.name(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Agent run succeeded"
                );
                debug!(output = %truncate_for_log(output.stdout.trim()), "Agent output");
                Ok(())
            }
            Err(e) => {
                if !e.output.stderr.is_empty() {
                    debug!(stderr = %truncate_for_log(e.output.stderr.trim()), "Agent stderr");
                }
                Err(TickError::Agent(e))
            }
        }
    }
}
