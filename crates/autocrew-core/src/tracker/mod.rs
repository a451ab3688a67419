//! Upstream tracker access
//!
//! The [`Tracker`] trait is the narrow surface the aggregator and monitor
//! need from an issue/PR tracker. [`github::GitHubClient`] implements it over
//! the GitHub REST API; tests substitute in-memory fakes.

pub mod github;
pub mod pending;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use github::GitHubClient;
pub use pending::{
    has_changes_requested, latest_reviews, IssueInfo, PendingAggregator, PendingItems,
    PullRequestInfo, ReviewInfo,
};

/// Repository coordinates (`owner/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches(".git");
        match trimmed.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(format!("expected owner/name, got \"{}\"", s)),
        }
    }
}

/// A tracker account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

/// Marker present on search results that are pull requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestLink {
    #[serde(default)]
    pub html_url: Option<String>,
}

/// One issue-search result; pull requests carry `pull_request`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pull_request: Option<PullRequestLink>,
}

impl SearchItem {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn author(&self) -> String {
        self.user
            .as_ref()
            .map(|u| u.login.clone())
            .unwrap_or_default()
    }
}

/// A submitted pull request review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub user: Option<User>,
    pub state: String,
    /// Pending (unsubmitted) reviews have no timestamp
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// What the aggregator and monitor need from a tracker
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Login of the identity the token belongs to
    async fn authenticated_user(&self) -> Result<String>;

    async fn default_branch(&self, repo: &RepoRef) -> Result<String>;

    /// Run an issue search; `query` is the tracker's search syntax
    async fn search_issues(&self, query: &str) -> Result<Vec<SearchItem>>;

    async fn pull_request_reviews(&self, repo: &RepoRef, number: u64) -> Result<Vec<Review>>;
}
