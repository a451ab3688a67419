//! Centralized path utilities
//!
//! All worker-private paths in one place for consistency

use std::path::{Path, PathBuf};

/// Directory name used under the home directory and inside repositories
pub const DIR_NAME: &str = ".autocrew";

/// Default worker home (~/.autocrew)
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DIR_NAME)
}

/// Private directory of one agent (<home>/agents/<name>)
pub fn agent_dir(home: &Path, agent_name: &str) -> PathBuf {
    home.join("agents").join(sanitize(agent_name))
}

/// Repository-wide prompt override (<workspace>/.autocrew/prompt.md)
pub fn repo_prompt_path(workspace: &Path) -> PathBuf {
    workspace.join(DIR_NAME).join("prompt.md")
}

/// Per-agent prompt override (<workspace>/.autocrew/agents/<name>.md)
pub fn agent_prompt_path(workspace: &Path, agent_name: &str) -> PathBuf {
    workspace
        .join(DIR_NAME)
        .join("agents")
        .join(format!("{}.md", sanitize(agent_name)))
}

/// Keep agent names usable as a single path component
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "agent".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_dir_layout() {
        let home = Path::new("/srv/worker");
        assert_eq!(
            agent_dir(home, "reviewer"),
            PathBuf::from("/srv/worker/agents/reviewer")
        );
    }

    #[test]
    fn test_agent_names_cannot_escape() {
        let home = Path::new("/srv/worker");
        assert_eq!(agent_dir(home, ".."), PathBuf::from("/srv/worker/agents/agent"));
        assert_eq!(
            agent_dir(home, "a/b c"),
            PathBuf::from("/srv/worker/agents/a_b_c")
        );
    }

    #[test]
    fn test_prompt_override_paths() {
        let ws = Path::new("/work");
        assert_eq!(repo_prompt_path(ws), PathBuf::from("/work/.autocrew/prompt.md"));
        assert_eq!(
            agent_prompt_path(ws, "builder"),
            PathBuf::from("/work/.autocrew/agents/builder.md")
        );
    }
}
