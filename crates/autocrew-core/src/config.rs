//! Worker configuration
//!
//! Every environment input is resolved once at startup into an immutable
//! [`WorkerConfig`]. Components receive the values they need through their
//! constructors and never read the environment themselves.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::agent::AgentSpec;
use crate::hooks::HookConfig;
use crate::mcp::{self, McpServers};
use crate::monitor::{MonitorSettings, MAX_CHECK_INTERVAL};
use crate::paths;
use crate::tracker::github::DEFAULT_API_URL;
use crate::tracker::RepoRef;

pub const DEFAULT_AGENT_NAME: &str = "agent";
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("failed to read {var} file {path:?}: {source}")]
    ReadFile {
        var: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Connection settings for the upstream tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    pub api_url: String,
    pub token: String,
    pub repository: RepoRef,
}

/// Effective settings of one worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub agent_name: String,
    /// Backend tag, validated by the agent registry
    pub agent_type: String,
    pub agent_binary: Option<String>,
    pub agent_args: Vec<String>,
    pub agent_env: BTreeMap<String, String>,
    pub role_prompt: String,
    pub common_prompt: String,
    pub check_interval: Duration,
    pub max_retries: u32,
    pub install_deps: bool,
    pub debug: bool,
    pub dry_run: bool,
    pub team_name: String,
    pub mcp_servers: McpServers,
    pub hooks: HookConfig,
    pub github_token: Option<String>,
    pub repository: Option<RepoRef>,
    pub github_api_url: String,
    pub workspace_dir: PathBuf,
    pub home: PathBuf,
}

impl WorkerConfig {
    /// Resolve from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Resolve from an explicit variable map. Empty values count as unset.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let agent_args = match get("AGENT_ARGS") {
            Some(raw) => shell_words::split(&raw).map_err(|e| ConfigError::Invalid {
                var: "AGENT_ARGS",
                reason: e.to_string(),
            })?,
            None => Vec::new(),
        };

        let agent_env = match get("AGENT_ENV") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                var: "AGENT_ENV",
                reason: e.to_string(),
            })?,
            None => BTreeMap::new(),
        };

        let common_prompt = match (get("COMMON_PROMPT"), get("COMMON_PROMPT_FILE")) {
            (Some(text), _) => text,
            (None, Some(file)) => {
                let path = PathBuf::from(file);
                std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
                    var: "COMMON_PROMPT_FILE",
                    path,
                    source,
                })?
            }
            (None, None) => String::new(),
        };

        let check_interval_secs = parse_at_least_one("CHECK_INTERVAL", get("CHECK_INTERVAL"))?
            .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS);
        if check_interval_secs > MAX_CHECK_INTERVAL.as_secs() {
            return Err(ConfigError::Invalid {
                var: "CHECK_INTERVAL",
                reason: format!(
                    "{} seconds exceeds the maximum of {}",
                    check_interval_secs,
                    MAX_CHECK_INTERVAL.as_secs()
                ),
            });
        }
        let max_retries = parse_at_least_one("MAX_RETRIES", get("MAX_RETRIES"))?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let mcp_servers = match get("MCP_SERVERS") {
            Some(raw) => mcp::parse_servers(&raw).map_err(|e| ConfigError::Invalid {
                var: "MCP_SERVERS",
                reason: format!("{:#}", e),
            })?,
            None => McpServers::new(),
        };

        let hooks = match get("HOOKS_CONFIG") {
            Some(raw) => HookConfig::from_json(&raw).map_err(|e| ConfigError::Invalid {
                var: "HOOKS_CONFIG",
                reason: e.to_string(),
            })?,
            None => HookConfig::default(),
        };

        let repository = get("GITHUB_REPOSITORY")
            .map(|raw| {
                raw.parse::<RepoRef>()
                    .map_err(|reason| ConfigError::Invalid {
                        var: "GITHUB_REPOSITORY",
                        reason,
                    })
            })
            .transpose()?;

        let workspace_dir = get("WORKSPACE_DIR")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            agent_name: get("AGENT_NAME").unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
            agent_type: get("AGENT_TYPE").unwrap_or_default(),
            agent_binary: get("AGENT_BINARY"),
            agent_args,
            agent_env,
            role_prompt: get("AGENT_ROLE_PROMPT").unwrap_or_default(),
            common_prompt,
            check_interval: Duration::from_secs(check_interval_secs),
            max_retries,
            install_deps: flag(get("INSTALL_DEPS")),
            debug: flag(get("DEBUG")),
            dry_run: flag(get("DRY_RUN")),
            team_name: get("TEAM_NAME").unwrap_or_default(),
            mcp_servers,
            hooks,
            github_token: get("GITHUB_TOKEN"),
            repository,
            github_api_url: get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            workspace_dir,
            home: get("AUTOCREW_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(paths::default_home),
        })
    }

    /// Declared identity handed to the agent registry
    pub fn agent_spec(&self) -> AgentSpec {
        AgentSpec {
            backend: self.agent_type.clone(),
            name: self.agent_name.clone(),
            binary_path: self.agent_binary.clone(),
            args: self.agent_args.clone(),
            env: self.agent_env.clone(),
            mcp_servers: self.mcp_servers.clone(),
            home: self.home.clone(),
        }
    }

    /// Loop settings for the monitor
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            check_interval: self.check_interval,
            max_retries: self.max_retries,
            dry_run: self.dry_run,
            verbose: self.debug,
            team_name: self.team_name.clone(),
            role_prompt: self.role_prompt.clone(),
            common_prompt: self.common_prompt.clone(),
        }
    }

    /// Tracker settings; required for the monitor
    pub fn tracker(&self) -> Result<TrackerSettings, ConfigError> {
        let token = self
            .github_token
            .clone()
            .ok_or(ConfigError::Missing("GITHUB_TOKEN"))?;
        let repository = self
            .repository
            .clone()
            .ok_or(ConfigError::Missing("GITHUB_REPOSITORY"))?;
        Ok(TrackerSettings {
            api_url: self.github_api_url.clone(),
            token,
            repository,
        })
    }
}

fn flag(value: Option<String>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Parse an integer, coercing anything below one up to one
fn parse_at_least_one(var: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    value
        .map(|raw| {
            raw.parse::<i64>()
                .map(|n| n.max(1) as u64)
                .map_err(|e| ConfigError::Invalid {
                    var,
                    reason: format!("\"{}\" is not an integer: {}", raw, e),
                })
        })
        .transpose()
}
