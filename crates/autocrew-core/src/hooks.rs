//! Lifecycle hooks
//!
//! Operators bind ordered command lists to four container lifecycle events.
//! Commands in an event run strictly in order, each bounded by its own
//! timeout. Whether a failure stops the event is decided per command:
//!
//! - `always`: log and continue
//! - `error` (default): log and continue
//! - `success`: the command must succeed; remaining commands are skipped and
//!   the event fails

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::process::{truncate_for_log, CommandSpec, ProcessRunner, TokioProcessRunner};

pub const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 30;

/// Default working directory for hook commands (the container root)
pub const DEFAULT_HOOK_DIR: &str = "/";

/// Lifecycle event a hook list is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    Init,
    Start,
    Stop,
    Error,
}

impl HookEvent {
    pub fn all() -> &'static [HookEvent] {
        &[HookEvent::Init, HookEvent::Start, HookEvent::Stop, HookEvent::Error]
    }

    /// Key used in the hooks manifest
    pub fn config_key(&self) -> &'static str {
        match self {
            HookEvent::Init => "onInit",
            HookEvent::Start => "onStart",
            HookEvent::Stop => "onStop",
            HookEvent::Error => "onError",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.config_key())
    }
}

impl FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "init" | "oninit" => Ok(HookEvent::Init),
            "start" | "onstart" => Ok(HookEvent::Start),
            "stop" | "onstop" => Ok(HookEvent::Stop),
            "error" | "onerror" => Ok(HookEvent::Error),
            other => Err(format!(
                "unknown hook event \"{}\" (expected init, start, stop or error)",
                other
            )),
        }
    }
}

/// What to do after a command finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinueOn {
    /// Continue regardless of outcome
    Always,
    /// Tolerate failures and continue
    #[default]
    Error,
    /// Only continue when the command succeeded
    Success,
}

impl ContinueOn {
    fn is_fatal_failure(self) -> bool {
        self == ContinueOn::Success
    }
}

/// One hook command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookCommand {
    /// Program to run; with no `args` it is run through `sh -c`
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub continue_on: ContinueOn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl HookCommand {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_seconds
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_HOOK_TIMEOUT_SECS),
        )
    }

    /// Label for logs: the description if present, otherwise the command
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.command)
    }

    /// The command line as configured
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            CommandSpec::new(&self.command)
                .args(self.args.iter().cloned())
                .display()
        }
    }

    /// Both output streams land in stdout, in the order they were written
    fn to_spec(&self, default_dir: &Path) -> CommandSpec {
        let spec = if self.args.is_empty() {
            CommandSpec::shell_merged(&self.command)
        } else {
            CommandSpec::exec_merged(&self.command, self.args.iter().cloned())
        };
        spec.envs(self.env.clone())
            .current_dir(self.working_dir.as_deref().unwrap_or(default_dir))
            .timeout(self.timeout())
    }
}

/// Hook lists for all four lifecycle events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookConfig {
    #[serde(default)]
    pub on_init: Vec<HookCommand>,
    #[serde(default)]
    pub on_start: Vec<HookCommand>,
    #[serde(default)]
    pub on_stop: Vec<HookCommand>,
    #[serde(default)]
    pub on_error: Vec<HookCommand>,
}

impl HookConfig {
    /// Parse the hooks manifest; empty input means no hooks
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
    }

    pub fn hooks(&self, event: HookEvent) -> &[HookCommand] {
        match event {
            HookEvent::Init => &self.on_init,
            HookEvent::Start => &self.on_start,
            HookEvent::Stop => &self.on_stop,
            HookEvent::Error => &self.on_error,
        }
    }

    pub fn is_empty(&self) -> bool {
        HookEvent::all().iter().all(|e| self.hooks(*e).is_empty())
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{event} hook #{index} ({command}) failed: {reason}")]
    Failed {
        event: HookEvent,
        index: usize,
        command: String,
        reason: String,
    },
    #[error("{event} hooks cancelled")]
    Cancelled { event: HookEvent },
}

/// Runs the configured hooks of one event at a time
pub struct HookExecutor {
    config: HookConfig,
    default_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl HookExecutor {
    pub fn new(config: HookConfig) -> Self {
        Self {
            config,
            default_dir: PathBuf::from(DEFAULT_HOOK_DIR),
            runner: Arc::new(TokioProcessRunner),
        }
    }

    pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = dir.into();
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Run every hook bound to `event`, in order
    pub async fn execute_hooks(
        &self,
        event: HookEvent,
        cancel: &CancellationToken,
    ) -> Result<(), HookError> {
        let hooks = self.config.hooks(event);
        if hooks.is_empty() {
            debug!(%event, "No hooks configured");
            return Ok(());
        }

        info!(%event, count = hooks.len(), "Running hooks");

        for (index, hook) in hooks.iter().enumerate() {
            let spec = hook.to_spec(&self.default_dir);
            let command = hook.display();

            let failure = match self.runner.run(&spec, cancel).await {
                Ok(output) => {
                    let combined = output.combined();
                    let duration_ms = output.duration.as_millis() as u64;
                    if output.success() {
                        info!(
                            %event,
                            index,
                            hook = hook.label(),
                            duration_ms,
                            output = %truncate_for_log(combined.trim()),
                            "Hook succeeded"
                        );
                        None
                    } else {
                        warn!(
                            %event,
                            index,
                            hook = hook.label(),
                            exit_code = ?output.exit_code,
                            duration_ms,
                            output = %truncate_for_log(combined.trim()),
                            "Hook failed"
                        );
                        Some(match output.exit_code {
                            Some(code) => format!("exit status {}", code),
                            None => "terminated by signal".to_string(),
                        })
                    }
                }
                Err(e) if e.is_cancelled() => {
                    warn!(%event, index, hook = hook.label(), "Hook cancelled");
                    return Err(HookError::Cancelled { event });
                }
                Err(e) => {
                    warn!(%event, index, hook = hook.label(), "Hook failed: {}", e);
                    Some(e.to_string())
                }
            };

            if let Some(reason) = failure {
                if hook.continue_on.is_fatal_failure() {
                    warn!(
                        %event,
                        index,
                        skipped = hooks.len() - index - 1,
                        "Aborting remaining hooks (continueOn: success)"
                    );
                    return Err(HookError::Failed {
                        event,
                        index,
                        command,
                        reason,
                    });
                }
                debug!(%event, index, continue_on = ?hook.continue_on, "Continuing after hook failure");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessError, ProcessOutput};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails any command whose script contains "fail"
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(
            &self,
            spec: &CommandSpec,
            _cancel: &CancellationToken,
        ) -> Result<ProcessOutput, ProcessError> {
            self.calls.lock().unwrap().push(spec.clone());
            let failing = spec.args.iter().any(|a| a.contains("fail"));
            Ok(ProcessOutput {
                stdout: "ran".into(),
                exit_code: Some(if failing { 1 } else { 0 }),
                ..Default::default()
            })
        }
    }

    fn hook(command: &str, continue_on: ContinueOn) -> HookCommand {
        HookCommand {
            command: command.to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout_seconds: None,
            continue_on,
            description: None,
        }
    }

    fn executor(config: HookConfig) -> (HookExecutor, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner::default());
        (HookExecutor::new(config).with_runner(runner.clone()), runner)
    }

    #[test]
    fn test_parse_manifest() {
        let json = r#"{
            "onInit": [
                {"command": "git", "args": ["config", "--global", "user.name", "bot"],
                 "continueOn": "success", "timeoutSeconds": 5, "workingDir": "/work",
                 "description": "git identity"}
            ],
            "onStop": [{"command": "echo bye", "env": {"A": "1"}}]
        }"#;
        let config = HookConfig::from_json(json).unwrap();
        assert_eq!(config.on_init.len(), 1);
        let init = &config.on_init[0];
        assert_eq!(init.continue_on, ContinueOn::Success);
        assert_eq!(init.timeout(), Duration::from_secs(5));
        assert_eq!(init.working_dir, Some(PathBuf::from("/work")));
        assert_eq!(init.label(), "git identity");

        let stop = &config.on_stop[0];
        assert_eq!(stop.continue_on, ContinueOn::Error);
        assert_eq!(stop.timeout(), Duration::from_secs(DEFAULT_HOOK_TIMEOUT_SECS));
        assert!(config.on_start.is_empty());
        assert!(config.on_error.is_empty());
    }

    #[test]
    fn test_unknown_continue_on_is_rejected() {
        let json = r#"{"onStart": [{"command": "x", "continueOn": "sucess"}]}"#;
        assert!(HookConfig::from_json(json).is_err());
    }

    #[test]
    fn test_empty_manifest_is_no_hooks() {
        assert!(HookConfig::from_json("").unwrap().is_empty());
        assert!(HookConfig::from_json("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_event() {
        assert_eq!("init".parse::<HookEvent>().unwrap(), HookEvent::Init);
        assert_eq!("onStop".parse::<HookEvent>().unwrap(), HookEvent::Stop);
        assert!("reboot".parse::<HookEvent>().is_err());
    }

    #[tokio::test]
    async fn test_no_hooks_is_noop() {
        let (executor, runner) = executor(HookConfig::default());
        for event in HookEvent::all() {
            executor
                .execute_hooks(*event, &CancellationToken::new())
                .await
                .unwrap();
        }
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_always_continues_after_failure() {
        let config = HookConfig {
            on_start: vec![
                hook("fail first", ContinueOn::Always),
                hook("echo second", ContinueOn::Always),
            ],
            ..Default::default()
        };
        let (executor, runner) = executor(config);

        executor
            .execute_hooks(HookEvent::Start, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_default_policy_tolerates_failure() {
        let config = HookConfig {
            on_stop: vec![
                hook("fail", ContinueOn::default()),
                hook("echo next", ContinueOn::default()),
            ],
            ..Default::default()
        };
        let (executor, runner) = executor(config);

        assert!(executor
            .execute_hooks(HookEvent::Stop, &CancellationToken::new())
            .await
            .is_ok());
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_success_policy_aborts_event() {
        let config = HookConfig {
            on_init: vec![
                hook("echo one", ContinueOn::Success),
                hook("fail two", ContinueOn::Success),
                hook("echo three", ContinueOn::Always),
            ],
            ..Default::default()
        };
        let (executor, runner) = executor(config);

        let err = executor
            .execute_hooks(HookEvent::Init, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HookError::Failed { index: 1, .. }));
        assert!(err.to_string().contains("#1"));
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_command_spec_defaults() {
        let mut with_args = hook("git", ContinueOn::Error);
        with_args.args = vec!["status".into()];
        with_args.working_dir = Some(PathBuf::from("/repo"));
        with_args.env.insert("GIT_PAGER".into(), "cat".into());
        let config = HookConfig {
            on_start: vec![hook("echo hi", ContinueOn::Error), with_args],
            ..Default::default()
        };
        let (executor, runner) = executor(config);

        executor
            .execute_hooks(HookEvent::Start, &CancellationToken::new())
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].program, "sh");
        assert_eq!(calls[0].args, vec!["-c", "exec 2>&1\necho hi"]);
        assert_eq!(calls[0].working_dir, Some(PathBuf::from("/")));
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(30)));
        assert_eq!(calls[1].program, "sh");
        assert_eq!(&calls[1].args[2..], ["git", "status"]);
        assert_eq!(calls[1].working_dir, Some(PathBuf::from("/repo")));
        assert_eq!(calls[1].env.get("GIT_PAGER").map(String::as_str), Some("cat"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let mut slow = hook("sleep 10", ContinueOn::Success);
        slow.timeout_seconds = Some(1);
        let config = HookConfig {
            on_init: vec![slow, hook("echo never", ContinueOn::Always)],
            ..Default::default()
        };
        let executor = HookExecutor::new(config).with_default_dir(std::env::temp_dir());

        let err = executor
            .execute_hooks(HookEvent::Init, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_failure_names_configured_command() {
        let mut with_args = hook("git", ContinueOn::Success);
        with_args.args = vec!["commit".into(), "-m".into(), "two words".into()];
        assert_eq!(with_args.display(), "git commit -m 'two words'");
        assert_eq!(hook("echo hi", ContinueOn::Error).display(), "echo hi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hook_output_is_interleaved() {
        let dir = tempfile::tempdir().unwrap();
        let spec = hook("echo one; echo two >&2; echo three", ContinueOn::Error).to_spec(dir.path());
        let output = TokioProcessRunner
            .run(&spec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.combined(), "one\ntwo\nthree\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_commands_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("order.log");
        let script = |n: u32| format!("echo {} >> {}", n, log.display());
        let config = HookConfig {
            on_start: vec![
                hook(&script(1), ContinueOn::Error),
                hook("exit 7", ContinueOn::Always),
                hook(&script(2), ContinueOn::Error),
            ],
            ..Default::default()
        };
        let executor = HookExecutor::new(config).with_default_dir(dir.path());

        executor
            .execute_hooks(HookEvent::Start, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "1\n2\n");
    }
}
