//! Read-only GitHub REST API client
//!
//! Every call authenticates through the [`CredentialCache`] and degrades to
//! `None` on any failure, so page rendering never depends on GitHub.

use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::security::token_cache::CredentialCache;
use crate::utils::text::{first_line, truncate_chars};

pub const DEFAULT_LIMIT: usize = 5;
const MAX_PACKAGES: usize = 5;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no GitHub credentials available")]
    Unauthenticated,

    #[error("GitHub API request timed out")]
    Timeout,

    #[error("GitHub API returned {0}")]
    NonSuccessStatus(u16),

    #[error("GitHub API request failed: {0}")]
    NetworkUnreachable(String),

    #[error("GitHub API returned an unreadable body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::NetworkUnreachable(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserProfile {
    pub avatar_url: String,
    pub name: String,
    pub bio: String,
    pub public_repos: u64,
    pub followers: u64,
    pub html_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkflowRunSummary {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub conclusion: String,
    pub branch: String,
    pub sha: String,
    pub created_at: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PackageSummary {
    pub name: String,
    pub url: String,
    pub visibility: String,
    pub created_at: String,
}

/// GitHub API client scoped to the portfolio owner and repository.
#[derive(Debug, Clone)]
pub struct GithubClient {
    base_url: String,
    username: String,
    repo: String,
    display_name: String,
    timeout: Duration,
    auth: CredentialCache,
    http_client: Client,
}

impl GithubClient {
    pub fn new(settings: &Settings, auth: CredentialCache) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .context("creating HTTP client")?;

        Ok(Self {
            base_url: settings.github_api_url.clone(),
            username: settings.profile.github_username.clone(),
            repo: settings.profile.github_repo.clone(),
            display_name: settings.profile.student_name.clone(),
            timeout: settings.api_timeout,
            auth,
            http_client,
        })
    }

    /// Authenticated GET; `Ok` only for a 200 with a JSON body.
    pub async fn try_get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let headers = self.auth.auth_headers().await.ok_or(ApiError::Unauthenticated)?;
        let url = format!("{}{}", self.base_url, path);

        debug!(url = %url, "GitHub API GET");
        let response = self
            .http_client
            .get(&url)
            .timeout(self.timeout)
            .headers(headers)
            .query(params)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ApiError::NonSuccessStatus(response.status().as_u16()));
        }
        Ok(response.json::<Value>().await?)
    }

    /// Like [`try_get`](Self::try_get) but logs and swallows failures.
    pub async fn get(&self, path: &str, params: &[(&str, String)]) -> Option<Value> {
        match self.try_get(path, params).await {
            Ok(value) => Some(value),
            Err(ApiError::Unauthenticated) => {
                debug!(path = %path, "skipping GitHub API call, not authenticated");
                None
            }
            Err(err) => {
                warn!(path = %path, error = %err, "GitHub API call failed");
                None
            }
        }
    }

    pub async fn user_profile(&self) -> Option<UserProfile> {
        let data = self.get(&format!("/users/{}", self.username), &[]).await?;
        Some(project_profile(&data, &self.username, &self.display_name))
    }

    pub async fn recent_commits(&self, limit: usize) -> Option<Vec<CommitSummary>> {
        let path = format!("/repos/{}/{}/commits", self.username, self.repo);
        let data = self.get(&path, &[("per_page", limit.to_string())]).await?;
        project_commits(&data, limit)
    }

    pub async fn workflow_runs(&self, limit: usize) -> Option<Vec<WorkflowRunSummary>> {
        let path = format!("/repos/{}/{}/actions/runs", self.username, self.repo);
        let data = self.get(&path, &[("per_page", limit.to_string())]).await?;
        Some(project_workflow_runs(&data, limit))
    }

    /// Container packages published to GHCR by the portfolio owner.
    pub async fn packages(&self) -> Option<Vec<PackageSummary>> {
        let path = format!("/users/{}/packages", self.username);
        let data = self
            .get(&path, &[("package_type", "container".to_string())])
            .await?;
        project_packages(&data)
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn string_or(value: &Value, pointer: &str, default: &str) -> String {
    str_at(value, pointer).unwrap_or(default).to_string()
}

fn project_profile(data: &Value, username: &str, display_name: &str) -> UserProfile {
    UserProfile {
        avatar_url: string_or(data, "/avatar_url", ""),
        name: string_or(data, "/name", display_name),
        bio: string_or(data, "/bio", ""),
        public_repos: data["public_repos"].as_u64().unwrap_or(0),
        followers: data["followers"].as_u64().unwrap_or(0),
        html_url: str_at(data, "/html_url")
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://github.com/{}", username)),
    }
}

fn project_commits(data: &Value, limit: usize) -> Option<Vec<CommitSummary>> {
    let Some(items) = data.as_array() else {
        warn!("commit list response is not an array");
        return None;
    };

    Some(
        items
            .iter()
            .take(limit)
            .filter_map(|c| {
                let sha = str_at(c, "/sha")?;
                Some(CommitSummary {
                    sha: truncate_chars(sha, 7),
                    message: first_line(str_at(c, "/commit/message").unwrap_or(""), 80),
                    author: string_or(c, "/commit/author/name", "unknown"),
                    date: string_or(c, "/commit/author/date", ""),
                    url: string_or(c, "/html_url", ""),
                })
            })
            .collect(),
    )
}

fn project_workflow_runs(data: &Value, limit: usize) -> Vec<WorkflowRunSummary> {
    let Some(runs) = data.get("workflow_runs").and_then(Value::as_array) else {
        return Vec::new();
    };

    runs.iter()
        .take(limit)
        .filter_map(|r| {
            Some(WorkflowRunSummary {
                id: r.get("id")?.as_u64()?,
                name: string_or(r, "/name", ""),
                status: string_or(r, "/status", "unknown"),
                // null while the run is still going
                conclusion: string_or(r, "/conclusion", "in_progress"),
                branch: string_or(r, "/head_branch", ""),
                sha: truncate_chars(str_at(r, "/head_sha").unwrap_or(""), 7),
                created_at: string_or(r, "/created_at", ""),
                url: string_or(r, "/html_url", ""),
            })
        })
        .collect()
}

fn project_packages(data: &Value) -> Option<Vec<PackageSummary>> {
    let Some(items) = data.as_array() else {
        warn!("package list response is not an array");
        return None;
    };

    Some(
        items
            .iter()
            .take(MAX_PACKAGES)
            .filter_map(|p| {
                Some(PackageSummary {
                    name: str_at(p, "/name")?.to_string(),
                    url: string_or(p, "/html_url", ""),
                    visibility: string_or(p, "/visibility", "unknown"),
                    created_at: string_or(p, "/created_at", ""),
                })
            })
            .collect(),
    )
}
