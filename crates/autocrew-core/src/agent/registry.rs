//! Agent registry
//!
//! The single construction point for agents. A backend tag is resolved to a
//! [`BackendKind`] and dispatched exhaustively; unknown tags fail closed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use super::backends::{BackendKind, ClaudeBackend, CodexBackend, DebugBackend, OpenCodeBackend};
use super::{Agent, CliAgent};
use crate::mcp::McpServers;
use crate::process::{ProcessRunner, TokioProcessRunner};

/// Declared agent identity
#[derive(Debug, Clone, Default)]
pub struct AgentSpec {
    /// Backend tag, e.g. "claude"
    pub backend: String,
    pub name: String,
    /// Overrides the backend's default binary
    pub binary_path: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mcp_servers: McpServers,
    /// Worker private directory (manifests live below it)
    pub home: PathBuf,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown agent backend \"{0}\" (expected one of: claude, codex, opencode, debug)")]
    UnknownBackend(String),
}

/// Build an agent that spawns real processes
pub fn create_agent(spec: AgentSpec) -> Result<Arc<dyn Agent>, RegistryError> {
    create_agent_with_runner(spec, Arc::new(TokioProcessRunner))
}

/// Build an agent on top of a custom process runner
pub fn create_agent_with_runner(
    spec: AgentSpec,
    runner: Arc<dyn ProcessRunner>,
) -> Result<Arc<dyn Agent>, RegistryError> {
    let kind = BackendKind::parse(&spec.backend)
        .ok_or_else(|| RegistryError::UnknownBackend(spec.backend.clone()))?;

    let AgentSpec {
        name,
        binary_path,
        args,
        env,
        mcp_servers,
        home,
        ..
    } = spec;

    tracing::debug!(agent = %name, backend = %kind, "Creating agent");

    let agent: Arc<dyn Agent> = match kind {
        BackendKind::Claude => Arc::new(CliAgent::new(
            ClaudeBackend,
            name,
            binary_path,
            args,
            env,
            mcp_servers,
            &home,
            runner,
        )),
        BackendKind::Codex => Arc::new(CliAgent::new(
            CodexBackend,
            name,
            binary_path,
            args,
            env,
            mcp_servers,
            &home,
            runner,
        )),
        BackendKind::OpenCode => Arc::new(CliAgent::new(
            OpenCodeBackend,
            name,
            binary_path,
            args,
            env,
            mcp_servers,
            &home,
            runner,
        )),
        BackendKind::Debug => Arc::new(CliAgent::new(
            DebugBackend,
            name,
            binary_path,
            args,
            env,
            mcp_servers,
            &home,
            runner,
        )),
    };

    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(backend: &str) -> AgentSpec {
        AgentSpec {
            backend: backend.to_string(),
            name: "worker-1".to_string(),
            home: PathBuf::from("/tmp/autocrew"),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_backend_names_value() {
        let err = match create_agent(spec("nonexistent")) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_empty_backend_is_rejected() {
        assert!(matches!(
            create_agent(spec("")),
            Err(RegistryError::UnknownBackend(ref s)) if s.is_empty()
        ));
    }

    #[test]
    fn test_dispatches_every_backend() {
        for kind in BackendKind::all() {
            let agent = create_agent(spec(kind.as_str())).unwrap();
            assert_eq!(agent.backend(), *kind);
            assert_eq!(agent.name(), "worker-1");
        }
    }

    #[test]
    fn test_capabilities_per_backend() {
        let claude = create_agent(spec("claude")).unwrap();
        assert!(claude.as_configurable().is_some());
        assert!(claude.as_http_server().is_none());
        assert!(claude.install_command().is_some());

        let opencode = create_agent(spec("OpenCode")).unwrap();
        assert!(opencode.as_configurable().is_some());
        assert!(opencode.as_http_server().is_some());

        let debug = create_agent(spec("debug")).unwrap();
        assert!(debug.as_configurable().is_none());
        assert!(debug.install_command().is_none());
    }
}
