pub mod fixture;
pub mod github;
pub mod types;

pub use fixture::FixtureSource;
pub use github::GitHubSource;
pub use types::{ChangedFile, Comment, Issue};

use async_trait::async_trait;
use thiserror::Error;

use crate::reference::Identifier;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("GitHub API request failed: {0}")]
    ApiRequest(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("GitHub token not found in environment")]
    MissingToken,

    #[error("Failed to read fixture: {0}")]
    FixtureRead(#[from] std::io::Error),

    #[error("Failed to parse fixture: {0}")]
    FixtureParse(#[from] serde_json::Error),

    #[error("Upstream error for {key}: {reason}")]
    Upstream { key: String, reason: String },
}

/// Where issues, pull requests and their discussions come from.
///
/// Every call may fail; the graph fetcher treats any error as "not found"
/// for that node and moves on.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn get_issue(&self, id: &Identifier) -> Result<Issue, SourceError>;

    /// Discussion comments in posting order.
    async fn list_comments(&self, id: &Identifier) -> Result<Vec<Comment>, SourceError>;

    /// Raw unified diff of a pull request.
    async fn get_diff(&self, id: &Identifier) -> Result<String, SourceError>;

    async fn list_changed_files(&self, id: &Identifier) -> Result<Vec<ChangedFile>, SourceError>;

    /// Inline review comments of a pull request. Sources without review
    /// threads return nothing.
    async fn list_review_comments(&self, _id: &Identifier) -> Result<Vec<Comment>, SourceError> {
        Ok(Vec::new())
    }
}
