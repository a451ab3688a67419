//! Pending-work aggregation
//!
//! Four independent tracker queries scoped to one repository and one
//! identity, merged into [`PendingItems`]:
//!
//! 1. open PRs where the identity is a requested reviewer
//! 2. open PRs assigned to the identity
//! 3. open issues assigned to the identity (pull requests filtered out)
//! 4. open PRs authored by the identity whose latest review from any
//!    reviewer requests changes
//!
//! A failed query fails the whole aggregation. A failed per-PR review lookup
//! only drops that PR.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{RepoRef, Review, SearchItem, Tracker};

pub const CHANGES_REQUESTED: &str = "CHANGES_REQUESTED";

/// One reviewer's most recent review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInfo {
    pub author: String,
    pub state: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub has_changes_requested: bool,
    /// Latest review per reviewer, only filled for PRs needing changes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviews: Vec<ReviewInfo>,
}

impl From<SearchItem> for PullRequestInfo {
    fn from(item: SearchItem) -> Self {
        Self {
            author: item.author(),
            number: item.number,
            title: item.title,
            url: item.html_url,
            created_at: item.created_at,
            updated_at: item.updated_at,
            has_changes_requested: false,
            reviews: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl From<SearchItem> for IssueInfo {
    fn from(item: SearchItem) -> Self {
        Self {
            author: item.author(),
            number: item.number,
            title: item.title,
            url: item.html_url,
            created_at: item.created_at,
            updated_at: item.updated_at,
            labels: item.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

/// Outstanding work found by one poll. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItems {
    pub review_requests: Vec<PullRequestInfo>,
    pub assigned_prs: Vec<PullRequestInfo>,
    pub assigned_issues: Vec<IssueInfo>,
    pub prs_with_changes: Vec<PullRequestInfo>,
}

impl PendingItems {
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn count(&self) -> usize {
        self.review_requests.len()
            + self.assigned_prs.len()
            + self.assigned_issues.len()
            + self.prs_with_changes.len()
    }
}

/// Reduce a review history to the most recent review of each reviewer.
///
/// Reviews without an author or a submission time (pending drafts) are
/// ignored. The result is ordered by submission time.
pub fn latest_reviews(reviews: &[Review]) -> Vec<ReviewInfo> {
    let mut latest: HashMap<&str, ReviewInfo> = HashMap::new();
    for review in reviews {
        let (Some(user), Some(submitted_at)) = (&review.user, review.submitted_at) else {
            continue;
        };
        let newer = latest
            .get(user.login.as_str())
            .is_none_or(|current| submitted_at > current.submitted_at);
        if newer {
            latest.insert(
                user.login.as_str(),
                ReviewInfo {
                    author: user.login.clone(),
                    state: review.state.clone(),
                    submitted_at,
                },
            );
        }
    }

    let mut result: Vec<ReviewInfo> = latest.into_values().collect();
    result.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.author.cmp(&b.author))
    });
    result
}

/// True when any reviewer's latest review requests changes
pub fn has_changes_requested(latest: &[ReviewInfo]) -> bool {
    latest
        .iter()
        .any(|r| r.state.eq_ignore_ascii_case(CHANGES_REQUESTED))
}

/// Runs the pending-work queries for one repository
pub struct PendingAggregator {
    tracker: Arc<dyn Tracker>,
    repo: RepoRef,
}

impl PendingAggregator {
    pub fn new(tracker: Arc<dyn Tracker>, repo: RepoRef) -> Self {
        Self { tracker, repo }
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    fn query(&self, qualifiers: &str) -> String {
        format!("repo:{} is:open {}", self.repo, qualifiers)
    }

    pub async fn fetch(&self, identity: &str) -> Result<PendingItems> {
        let review_query = self.query(&format!("is:pr review-requested:{}", identity));
        let assigned_pr_query = self.query(&format!("is:pr assignee:{}", identity));
        let assigned_issue_query = self.query(&format!("is:issue assignee:{}", identity));
        let authored_query = self.query(&format!("is:pr author:{}", identity));

        let (review_requests, assigned_prs, assigned_issues, authored) = futures::try_join!(
            async {
                self.tracker
                    .search_issues(&review_query)
                    .await
                    .context("Failed to fetch review requests")
            },
            async {
                self.tracker
                    .search_issues(&assigned_pr_query)
                    .await
                    .context("Failed to fetch assigned pull requests")
            },
            async {
                self.tracker
                    .search_issues(&assigned_issue_query)
                    .await
                    .context("Failed to fetch assigned issues")
            },
            async {
                self.tracker
                    .search_issues(&authored_query)
                    .await
                    .context("Failed to fetch authored pull requests")
            },
        )?;

        let prs_with_changes = self.changes_requested(authored).await;

        let items = PendingItems {
            review_requests: review_requests.into_iter().map(Into::into).collect(),
            assigned_prs: assigned_prs.into_iter().map(Into::into).collect(),
            assigned_issues: assigned_issues
                .into_iter()
                .filter(|item| !item.is_pull_request())
                .map(Into::into)
                .collect(),
            prs_with_changes,
        };

        debug!(
            repo = %self.repo,
            identity,
            review_requests = items.review_requests.len(),
            assigned_prs = items.assigned_prs.len(),
            assigned_issues = items.assigned_issues.len(),
            prs_with_changes = items.prs_with_changes.len(),
            "Aggregated pending items"
        );

        Ok(items)
    }

    /// Keep authored PRs whose reduced reviews request changes
    async fn changes_requested(&self, authored: Vec<SearchItem>) -> Vec<PullRequestInfo> {
        let lookups = authored
            .into_iter()
            .filter(SearchItem::is_pull_request)
            .map(|item| async move {
                let reviews = self
                    .tracker
                    .pull_request_reviews(&self.repo, item.number)
                    .await;
                (item, reviews)
            });

        let mut result = Vec::new();
        for (item, reviews) in futures::future::join_all(lookups).await {
            let reviews = match reviews {
                Ok(reviews) => reviews,
                Err(e) => {
                    warn!(pr = item.number, "Skipping PR, failed to fetch reviews: {:#}", e);
                    continue;
                }
            };
            let latest = latest_reviews(&reviews);
            if has_changes_requested(&latest) {
                let mut pr = PullRequestInfo::from(item);
                pr.has_changes_requested = true;
                pr.reviews = latest;
                result.push(pr);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{Label, PullRequestLink, User};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn review(author: &str, state: &str, hour: u32) -> Review {
        Review {
            user: Some(User {
                login: author.into(),
            }),
            state: state.into(),
            submitted_at: Some(at(hour)),
        }
    }

    fn item(number: u64, is_pr: bool) -> SearchItem {
        SearchItem {
            number,
            title: format!("Item {}", number),
            html_url: format!("https://github.com/acme/widgets/issues/{}", number),
            user: Some(User {
                login: "crew-bot".into(),
            }),
            labels: vec![Label {
                name: "triage".into(),
            }],
            created_at: at(1),
            updated_at: at(2),
            pull_request: is_pr.then(PullRequestLink::default),
        }
    }

    #[test]
    fn test_latest_review_per_reviewer_wins() {
        let reviews = vec![
            review("alice", "APPROVED", 1),
            review("alice", "CHANGES_REQUESTED", 2),
            review("bob", "CHANGES_REQUESTED", 3),
        ];
        let latest = latest_reviews(&reviews);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].author, "alice");
        assert_eq!(latest[0].submitted_at, at(2));
        assert_eq!(latest[1].author, "bob");
        assert_eq!(latest[1].submitted_at, at(3));
        assert!(has_changes_requested(&latest));
    }

    #[test]
    fn test_superseded_change_request_is_ignored() {
        let reviews = vec![
            review("alice", "CHANGES_REQUESTED", 1),
            review("alice", "APPROVED", 2),
        ];
        let latest = latest_reviews(&reviews);
        assert_eq!(latest.len(), 1);
        assert!(!has_changes_requested(&latest));
    }

    #[test]
    fn test_state_match_is_case_insensitive() {
        let latest = latest_reviews(&[review("carol", "changes_requested", 4)]);
        assert!(has_changes_requested(&latest));
    }

    #[test]
    fn test_unsubmitted_reviews_are_ignored() {
        let mut pending = review("dave", "CHANGES_REQUESTED", 5);
        pending.submitted_at = None;
        assert!(latest_reviews(&[pending]).is_empty());
    }

    #[test]
    fn test_is_empty_iff_count_zero() {
        let mut items = PendingItems::default();
        assert!(items.is_empty());
        assert_eq!(items.count(), 0);

        items.assigned_issues.push(IssueInfo::from(item(3, false)));
        assert!(!items.is_empty());
        assert_eq!(items.count(), 1);

        items.prs_with_changes.push(PullRequestInfo::from(item(4, true)));
        assert_eq!(items.count(), 2);
    }

    /// Answers searches by matching qualifiers in the query
    struct FakeTracker {
        reviews: HashMap<u64, Result<Vec<Review>, String>>,
        fail_query: Option<&'static str>,
    }

    #[async_trait]
    impl Tracker for FakeTracker {
        async fn authenticated_user(&self) -> Result<String> {
            Ok("crew-bot".into())
        }

        async fn default_branch(&self, _repo: &RepoRef) -> Result<String> {
            Ok("main".into())
        }

        async fn search_issues(&self, query: &str) -> Result<Vec<SearchItem>> {
            assert!(query.starts_with("repo:acme/widgets is:open "));
            if let Some(fail) = self.fail_query {
                if query.contains(fail) {
                    return Err(anyhow!("rate limited"));
                }
            }
            Ok(if query.contains("review-requested:crew-bot") {
                vec![item(1, true)]
            } else if query.contains("is:pr assignee:crew-bot") {
                vec![item(2, true)]
            } else if query.contains("is:issue assignee:crew-bot") {
                // The search can still surface linked PRs
                vec![item(3, false), item(30, true)]
            } else if query.contains("author:crew-bot") {
                vec![item(4, true), item(5, true), item(6, true)]
            } else {
                Vec::new()
            })
        }

        async fn pull_request_reviews(&self, _repo: &RepoRef, number: u64) -> Result<Vec<Review>> {
            match self.reviews.get(&number) {
                Some(Ok(reviews)) => Ok(reviews.clone()),
                Some(Err(e)) => Err(anyhow!(e.clone())),
                None => Ok(Vec::new()),
            }
        }
    }

    fn aggregator(tracker: FakeTracker) -> PendingAggregator {
        PendingAggregator::new(Arc::new(tracker), RepoRef::new("acme", "widgets"))
    }

    #[tokio::test]
    async fn test_fetch_merges_all_categories() {
        let mut reviews = HashMap::new();
        reviews.insert(
            4,
            Ok(vec![
                review("alice", "APPROVED", 1),
                review("alice", "CHANGES_REQUESTED", 2),
                review("bob", "CHANGES_REQUESTED", 3),
            ]),
        );
        reviews.insert(5, Ok(vec![review("alice", "APPROVED", 1)]));
        reviews.insert(6, Err("boom".to_string()));

        let items = aggregator(FakeTracker {
            reviews,
            fail_query: None,
        })
        .fetch("crew-bot")
        .await
        .unwrap();

        assert_eq!(items.review_requests[0].number, 1);
        assert_eq!(items.assigned_prs[0].number, 2);
        assert_eq!(items.assigned_issues.len(), 1);
        assert_eq!(items.assigned_issues[0].number, 3);
        assert_eq!(items.assigned_issues[0].labels, vec!["triage".to_string()]);

        // PR 5 is approved and PR 6 failed its lookup
        assert_eq!(items.prs_with_changes.len(), 1);
        let pr = &items.prs_with_changes[0];
        assert_eq!(pr.number, 4);
        assert!(pr.has_changes_requested);
        assert_eq!(pr.reviews.len(), 2);
        assert_eq!(items.count(), 4);
    }

    #[tokio::test]
    async fn test_failed_query_fails_aggregation() {
        let err = aggregator(FakeTracker {
            reviews: HashMap::new(),
            fail_query: Some("is:issue"),
        })
        .fetch("crew-bot")
        .await
        .unwrap_err();
        assert!(format!("{:#}", err).contains("assigned issues"));
    }
}
