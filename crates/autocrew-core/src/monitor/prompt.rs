//! Prompt assembly for a monitor tick

use std::fmt::Write as _;
use std::path::Path;

use crate::paths;
use crate::tracker::{IssueInfo, PendingItems, PullRequestInfo};

pub const SMALL_CHANGES_POLICY: &str = "\
Prefer many small, logically separated commits and pull requests over one \
large pull request. Each pull request should do one thing and be easy to \
review on its own.";

/// Markdown digest of pending work, grouped by category
pub fn format_pending_items(items: &PendingItems, identity: &str, repo: &str) -> String {
    let mut out = format!(
        "# Pending work for @{} in {} ({} item{})\n",
        identity,
        repo,
        items.count(),
        if items.count() == 1 { "" } else { "s" }
    );

    write_prs(&mut out, "Review requests", &items.review_requests);
    write_prs(&mut out, "Assigned pull requests", &items.assigned_prs);
    write_issues(&mut out, "Assigned issues", &items.assigned_issues);
    write_prs(
        &mut out,
        "Your pull requests with requested changes",
        &items.prs_with_changes,
    );

    out
}

fn write_prs(out: &mut String, heading: &str, prs: &[PullRequestInfo]) {
    if prs.is_empty() {
        return;
    }
    let _ = write!(out, "\n## {}\n\n", heading);
    for pr in prs {
        let _ = write!(out, "- [#{} {}]({}) by @{}", pr.number, pr.title, pr.url, pr.author);
        let requesters: Vec<String> = pr
            .reviews
            .iter()
            .filter(|r| r.state.eq_ignore_ascii_case(crate::tracker::pending::CHANGES_REQUESTED))
            .map(|r| format!("@{}", r.author))
            .collect();
        if !requesters.is_empty() {
            let _ = write!(out, " (changes requested by {})", requesters.join(", "));
        }
        out.push('\n');
    }
}

fn write_issues(out: &mut String, heading: &str, issues: &[IssueInfo]) {
    if issues.is_empty() {
        return;
    }
    let _ = write!(out, "\n## {}\n\n", heading);
    for issue in issues {
        let _ = write!(out, "- [#{} {}]({})", issue.number, issue.title, issue.url);
        if !issue.labels.is_empty() {
            let _ = write!(out, " [{}]", issue.labels.join(", "));
        }
        out.push('\n');
    }
}

/// Inputs to [`build_prompt`]; empty sections are left out
#[derive(Debug, Clone, Default)]
pub struct PromptSections<'a> {
    pub digest: &'a str,
    pub role_prompt: &'a str,
    pub common_prompt: &'a str,
    pub overrides: &'a [String],
}

pub fn build_prompt(sections: &PromptSections<'_>) -> String {
    let mut parts: Vec<&str> = vec![sections.digest, SMALL_CHANGES_POLICY];
    parts.push(sections.role_prompt);
    parts.push(sections.common_prompt);
    parts.extend(sections.overrides.iter().map(String::as_str));

    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Read the repository-local prompt overrides that exist
pub async fn load_prompt_overrides(workspace: &Path, agent_name: &str) -> Vec<String> {
    let candidates = [
        paths::repo_prompt_path(workspace),
        paths::agent_prompt_path(workspace, agent_name),
    ];

    let mut overrides = Vec::new();
    for path in candidates {
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "Loaded prompt override");
                overrides.push(text);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to read prompt override: {}", e);
            }
        }
    }
    overrides
}
