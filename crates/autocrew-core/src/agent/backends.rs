//! Backend definitions
//!
//! Each backend describes how one CLI is invoked: its default binary, how
//! [`RunOptions`] translate into argv, where it reads its MCP manifest, and how
//! it is installed. Process handling and retries live in [`super::CliAgent`].

use std::fmt;
use std::path::{Path, PathBuf};

use super::RunOptions;

/// The closed set of supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Claude,
    Codex,
    OpenCode,
    Debug,
}

impl BackendKind {
    pub fn all() -> &'static [BackendKind] {
        &[
            BackendKind::Claude,
            BackendKind::Codex,
            BackendKind::OpenCode,
            BackendKind::Debug,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Claude => "claude",
            BackendKind::Codex => "codex",
            BackendKind::OpenCode => "opencode",
            BackendKind::Debug => "debug",
        }
    }

    /// Parse a backend tag (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "claude-code" | "claude_code" => Some(BackendKind::Claude),
            "codex" => Some(BackendKind::Codex),
            "opencode" | "open-code" => Some(BackendKind::OpenCode),
            "debug" => Some(BackendKind::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inputs for building one attempt's argv
#[derive(Debug, Clone, Copy)]
pub struct ArgContext<'a> {
    pub options: &'a RunOptions,
    /// 1-based attempt number
    pub attempt: u32,
    /// User-declared arguments, appended after the backend's own flags
    pub extra_args: &'a [String],
    /// Manifest to point the backend at, when MCP servers are configured
    pub mcp_manifest: Option<&'a Path>,
}

impl ArgContext<'_> {
    fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

pub trait Backend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    fn default_binary(&self) -> &'static str;

    fn build_args(&self, ctx: &ArgContext<'_>) -> Vec<String>;

    /// Extra environment for a run, on top of the inherited and declared vars
    fn run_env(&self, _ctx: &ArgContext<'_>) -> Vec<(String, String)> {
        Vec::new()
    }

    fn version_args(&self) -> Vec<String> {
        vec!["--version".to_string()]
    }

    /// Unattended install command (run through `sh -c`)
    fn install_script(&self) -> Option<&'static str> {
        None
    }

    fn install_hint(&self) -> String;

    /// Worker manifest location inside the agent's private directory
    fn manifest_path(&self, _agent_dir: &Path) -> Option<PathBuf> {
        None
    }

    fn project_manifest_path(&self, _project_dir: &Path) -> Option<PathBuf> {
        None
    }

    /// Args and env that start the backend's HTTP control surface
    fn server_invocation(
        &self,
        _port: u16,
        _api_key: Option<&str>,
    ) -> Option<(Vec<String>, Vec<(String, String)>)> {
        None
    }
}

fn push_output_format(args: &mut Vec<String>, flag: &str, options: &RunOptions) {
    if let Some(format) = options.output_format.as_deref().filter(|f| !f.is_empty()) {
        args.push(flag.to_string());
        args.push(format.to_string());
    }
}

/// Claude Code (`claude --print`, prompt on stdin)
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeBackend;

impl Backend for ClaudeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Claude
    }

    fn default_binary(&self) -> &'static str {
        "claude"
    }

    fn build_args(&self, ctx: &ArgContext<'_>) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--dangerously-skip-permissions".to_string(),
        ];
        push_output_format(&mut args, "--output-format", ctx.options);
        if ctx.options.verbose {
            args.push("--verbose".to_string());
        }
        if let Some(manifest) = ctx.mcp_manifest {
            args.push("--mcp-config".to_string());
            args.push(manifest.to_string_lossy().into_owned());
        }
        if ctx.options.continue_mode || ctx.is_retry() {
            args.push("--continue".to_string());
        }
        args.extend(ctx.extra_args.iter().cloned());
        args
    }

    fn install_script(&self) -> Option<&'static str> {
        Some("npm install -g @anthropic-ai/claude-code")
    }

    fn install_hint(&self) -> String {
        "Install it with `npm install -g @anthropic-ai/claude-code` or set AGENT_BINARY.".to_string()
    }

    fn manifest_path(&self, agent_dir: &Path) -> Option<PathBuf> {
        Some(agent_dir.join("claude").join("mcp.json"))
    }

    fn project_manifest_path(&self, project_dir: &Path) -> Option<PathBuf> {
        Some(project_dir.join(".mcp.json"))
    }
}

/// Codex (`codex exec -`, prompt on stdin)
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexBackend;

impl Backend for CodexBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Codex
    }

    fn default_binary(&self) -> &'static str {
        "codex"
    }

    fn build_args(&self, ctx: &ArgContext<'_>) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        // codex only resumes on explicit request; a retry starts a fresh session
        if ctx.options.continue_mode {
            args.push("resume".to_string());
            args.push("--last".to_string());
        }
        args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        args.push("--skip-git-repo-check".to_string());
        if ctx.options.output_format.as_deref() == Some("json") {
            args.push("--json".to_string());
        }
        args.extend(ctx.extra_args.iter().cloned());
        args.push("-".to_string());
        args
    }

    fn install_script(&self) -> Option<&'static str> {
        Some("npm install -g @openai/codex")
    }

    fn install_hint(&self) -> String {
        "Install it with `npm install -g @openai/codex` or set AGENT_BINARY.".to_string()
    }
}

/// OpenCode (`opencode run`, prompt on stdin)
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCodeBackend;

impl Backend for OpenCodeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenCode
    }

    fn default_binary(&self) -> &'static str {
        "opencode"
    }

    fn build_args(&self, ctx: &ArgContext<'_>) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        push_output_format(&mut args, "--format", ctx.options);
        if ctx.options.verbose {
            args.push("--print-logs".to_string());
        }
        if ctx.options.continue_mode || ctx.is_retry() {
            args.push("--continue".to_string());
        }
        args.extend(ctx.extra_args.iter().cloned());
        args
    }

    fn run_env(&self, ctx: &ArgContext<'_>) -> Vec<(String, String)> {
        ctx.mcp_manifest
            .map(|manifest| {
                vec![(
                    "OPENCODE_CONFIG".to_string(),
                    manifest.to_string_lossy().into_owned(),
                )]
            })
            .unwrap_or_default()
    }

    fn install_script(&self) -> Option<&'static str> {
        Some("npm install -g opencode-ai")
    }

    fn install_hint(&self) -> String {
        "Install it with `npm install -g opencode-ai` or set AGENT_BINARY.".to_string()
    }

    fn manifest_path(&self, agent_dir: &Path) -> Option<PathBuf> {
        Some(agent_dir.join("opencode").join("mcp.json"))
    }

    fn project_manifest_path(&self, project_dir: &Path) -> Option<PathBuf> {
        Some(project_dir.join(".opencode").join("mcp.json"))
    }

    fn server_invocation(
        &self,
        port: u16,
        api_key: Option<&str>,
    ) -> Option<(Vec<String>, Vec<(String, String)>)> {
        let args = vec![
            "serve".to_string(),
            "--port".to_string(),
            port.to_string(),
            "--hostname".to_string(),
            "0.0.0.0".to_string(),
        ];
        let env = api_key
            .map(|key| vec![("OPENCODE_SERVER_PASSWORD".to_string(), key.to_string())])
            .unwrap_or_default();
        Some((args, env))
    }
}

/// Deterministic test double: pipes the prompt through `cat` (or a declared command)
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugBackend;

impl Backend for DebugBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Debug
    }

    fn default_binary(&self) -> &'static str {
        "cat"
    }

    fn build_args(&self, ctx: &ArgContext<'_>) -> Vec<String> {
        ctx.extra_args.to_vec()
    }

    fn version_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn install_hint(&self) -> String {
        "The debug backend needs `cat` on PATH, or set AGENT_BINARY.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(options: &'a RunOptions, attempt: u32, extra: &'a [String]) -> ArgContext<'a> {
        ArgContext {
            options,
            attempt,
            extra_args: extra,
            mcp_manifest: None,
        }
    }

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!(BackendKind::parse("Claude"), Some(BackendKind::Claude));
        assert_eq!(BackendKind::parse(" codex "), Some(BackendKind::Codex));
        assert_eq!(BackendKind::parse("open-code"), Some(BackendKind::OpenCode));
        assert_eq!(BackendKind::parse("debug"), Some(BackendKind::Debug));
        assert_eq!(BackendKind::parse("nonexistent"), None);
        assert_eq!(BackendKind::parse(""), None);
        for kind in BackendKind::all() {
            assert_eq!(BackendKind::parse(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn test_claude_continues_on_retry() {
        let options = RunOptions::default();
        let first = ClaudeBackend.build_args(&ctx(&options, 1, &[]));
        assert!(!first.contains(&"--continue".to_string()));

        let retry = ClaudeBackend.build_args(&ctx(&options, 2, &[]));
        assert!(retry.contains(&"--continue".to_string()));
    }

    #[test]
    fn test_claude_flags() {
        let options = RunOptions {
            continue_mode: true,
            output_format: Some("stream-json".into()),
            verbose: true,
            ..Default::default()
        };
        let extra = vec!["--model".to_string(), "opus".to_string()];
        let manifest = PathBuf::from("/home/w/.autocrew/agents/a/claude/mcp.json");
        let args = ClaudeBackend.build_args(&ArgContext {
            options: &options,
            attempt: 1,
            extra_args: &extra,
            mcp_manifest: Some(&manifest),
        });
        assert_eq!(
            args,
            vec![
                "--print",
                "--dangerously-skip-permissions",
                "--output-format",
                "stream-json",
                "--verbose",
                "--mcp-config",
                "/home/w/.autocrew/agents/a/claude/mcp.json",
                "--continue",
                "--model",
                "opus",
            ]
        );
    }

    #[test]
    fn test_codex_resumes_only_in_continue_mode() {
        let options = RunOptions::default();
        let retry = CodexBackend.build_args(&ctx(&options, 3, &[]));
        assert!(!retry.contains(&"resume".to_string()));
        assert_eq!(retry.last().map(String::as_str), Some("-"));

        let options = RunOptions {
            continue_mode: true,
            ..Default::default()
        };
        let resumed = CodexBackend.build_args(&ctx(&options, 1, &[]));
        assert_eq!(&resumed[..3], &["exec", "resume", "--last"]);
    }

    #[test]
    fn test_opencode_points_at_manifest_through_env() {
        let options = RunOptions::default();
        let manifest = PathBuf::from("/tmp/opencode/mcp.json");
        let context = ArgContext {
            options: &options,
            attempt: 2,
            extra_args: &[],
            mcp_manifest: Some(&manifest),
        };
        assert_eq!(OpenCodeBackend.build_args(&context), vec!["run", "--continue"]);
        assert_eq!(
            OpenCodeBackend.run_env(&context),
            vec![("OPENCODE_CONFIG".to_string(), "/tmp/opencode/mcp.json".to_string())]
        );
    }

    #[test]
    fn test_debug_never_adds_flags() {
        let options = RunOptions {
            continue_mode: true,
            verbose: true,
            ..Default::default()
        };
        assert!(DebugBackend.build_args(&ctx(&options, 5, &[])).is_empty());
    }

    #[test]
    fn test_manifest_locations() {
        let agent_dir = Path::new("/w/agents/a");
        assert_eq!(
            ClaudeBackend.manifest_path(agent_dir),
            Some(PathBuf::from("/w/agents/a/claude/mcp.json"))
        );
        assert_eq!(
            OpenCodeBackend.project_manifest_path(Path::new("/repo")),
            Some(PathBuf::from("/repo/.opencode/mcp.json"))
        );
        assert!(CodexBackend.manifest_path(agent_dir).is_none());
        assert!(DebugBackend.server_invocation(8080, None).is_none());
    }
}
