//! GitHub REST client
//!
//! Implements [`Tracker`] with the four endpoints the worker needs:
//! `GET /user`, `GET /repos/{owner}/{repo}`, `GET /search/issues` and
//! `GET /repos/{owner}/{repo}/pulls/{number}/reviews`. List endpoints are
//! paginated until a short page is returned.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{RepoRef, Review, SearchItem, Tracker, User};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PER_PAGE: usize = 100;
/// The search API serves at most 1000 results
const MAX_PAGES: usize = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    items: Vec<SearchItem>,
}

/// Token-authenticated GitHub API client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
}

impl GitHubClient {
    pub fn new(base_url: impl Into<String>, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(API_VERSION),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .context("GitHub token contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("autocrew/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("GitHub request {} failed ({}): {}", path, status, body.trim()));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", path))
    }
}

#[async_trait]
impl Tracker for GitHubClient {
    async fn authenticated_user(&self) -> Result<String> {
        let user: User = self.get_json("/user", &[]).await?;
        Ok(user.login)
    }

    async fn default_branch(&self, repo: &RepoRef) -> Result<String> {
        let path = format!("/repos/{}/{}", repo.owner, repo.name);
        let response: RepositoryResponse = self.get_json(&path, &[]).await?;
        Ok(response.default_branch)
    }

    async fn search_issues(&self, query: &str) -> Result<Vec<SearchItem>> {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let response: SearchResponse = self
                .get_json(
                    "/search/issues",
                    &[
                        ("q", query.to_string()),
                        ("per_page", PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await
                .with_context(|| format!("Issue search failed: {}", query))?;

            let received = response.items.len();
            items.extend(response.items);
            if received < PER_PAGE || items.len() >= response.total_count {
                break;
            }
        }
        tracing::debug!(query, count = items.len(), "Issue search complete");
        Ok(items)
    }

    async fn pull_request_reviews(&self, repo: &RepoRef, number: u64) -> Result<Vec<Review>> {
        let path = format!("/repos/{}/{}/pulls/{}/reviews", repo.owner, repo.name, number);
        let mut reviews = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<Review> = self
                .get_json(
                    &path,
                    &[
                        ("per_page", PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let received = batch.len();
            reviews.extend(batch);
            if received < PER_PAGE {
                break;
            }
        }
        Ok(reviews)
    }
}
