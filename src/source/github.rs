use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{ChangedFile, Comment, Issue, IssueSource, SourceError};
use crate::config::GitHubConfig;
use crate::reference::Identifier;

const PER_PAGE: usize = 100;
/// Upper bound on pages walked per listing.
const MAX_PAGES: usize = 10;

#[derive(Deserialize)]
struct User {
    login: String,
}

#[derive(Deserialize)]
struct IssueResponse {
    #[serde(default)]
    title: String,
    body: Option<String>,
    html_url: String,
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: u64,
    user: Option<User>,
    body: Option<String>,
}

impl From<CommentResponse> for Comment {
    fn from(c: CommentResponse) -> Self {
        Comment {
            id: c.id,
            author: c.user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string()),
            body: c.body.unwrap_or_default(),
        }
    }
}

/// GitHub REST API v3 client.
pub struct GitHubSource {
    client: reqwest::Client,
    api_base_url: String,
    token: String,
    user_agent: String,
}

impl GitHubSource {
    pub fn new(config: &GitHubConfig) -> Result<Self, SourceError> {
        let token = config.resolved_token().ok_or(SourceError::MissingToken)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token,
            user_agent: config.user_agent.clone(),
        })
    }

    fn repo_url(&self, id: &Identifier) -> String {
        format!("{}/repos/{}/{}", self.api_base_url, id.owner, id.repo)
    }

    async fn get(&self, url: &str, accept: &str, id: &Identifier) -> Result<reqwest::Response, SourceError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(id.key()));
        }
        Ok(response.error_for_status()?)
    }

    /// Walk `?per_page=100&page=N` until a short page comes back.
    async fn get_paginated<T: DeserializeOwned>(&self, url: &str, id: &Identifier) -> Result<Vec<T>, SourceError> {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let page_url = format!("{url}?per_page={PER_PAGE}&page={page}");
            let batch = self
                .get(&page_url, "application/vnd.github+json", id)
                .await?
                .json::<Vec<T>>()
                .await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl IssueSource for GitHubSource {
    #[instrument(skip(self), fields(key = %id))]
    async fn get_issue(&self, id: &Identifier) -> Result<Issue, SourceError> {
        let url = format!("{}/issues/{}", self.repo_url(id), id.number);
        debug!("fetching issue metadata from GitHub API");
        let issue = self
            .get(&url, "application/vnd.github+json", id)
            .await?
            .json::<IssueResponse>()
            .await?;
        Ok(Issue {
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            is_pull_request: issue.pull_request.is_some(),
            html_url: issue.html_url,
        })
    }

    #[instrument(skip(self), fields(key = %id))]
    async fn list_comments(&self, id: &Identifier) -> Result<Vec<Comment>, SourceError> {
        let url = format!("{}/issues/{}/comments", self.repo_url(id), id.number);
        let comments: Vec<CommentResponse> = self.get_paginated(&url, id).await?;
        debug!(comments = comments.len(), "received comments");
        Ok(comments.into_iter().map(Comment::from).collect())
    }

    #[instrument(skip(self), fields(key = %id))]
    async fn get_diff(&self, id: &Identifier) -> Result<String, SourceError> {
        let url = format!("{}/pulls/{}", self.repo_url(id), id.number);
        let diff = self
            .get(&url, "application/vnd.github.diff", id)
            .await?
            .text()
            .await?;
        debug!(diff_bytes = diff.len(), "received PR diff");
        Ok(diff)
    }

    #[instrument(skip(self), fields(key = %id))]
    async fn list_changed_files(&self, id: &Identifier) -> Result<Vec<ChangedFile>, SourceError> {
        let url = format!("{}/pulls/{}/files", self.repo_url(id), id.number);
        let files: Vec<ChangedFile> = self.get_paginated(&url, id).await?;
        debug!(files = files.len(), "received changed files");
        Ok(files)
    }

    #[instrument(skip(self), fields(key = %id))]
    async fn list_review_comments(&self, id: &Identifier) -> Result<Vec<Comment>, SourceError> {
        let url = format!("{}/pulls/{}/comments", self.repo_url(id), id.number);
        let comments: Vec<CommentResponse> = self.get_paginated(&url, id).await?;
        debug!(comments = comments.len(), "received review comments");
        Ok(comments.into_iter().map(Comment::from).collect())
    }
}
