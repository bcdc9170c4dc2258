use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::types::null_as_empty;
use super::{ChangedFile, Comment, Issue, IssueSource, SourceError};
use crate::reference::Identifier;

/// One stored issue or pull request with everything the source can return.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureIssue {
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
    #[serde(default)]
    pub is_pull_request: bool,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub review_comments: Vec<Comment>,
    #[serde(default)]
    pub diff: String,
    #[serde(default)]
    pub files: Vec<ChangedFile>,
}

#[derive(Debug, Default, Deserialize)]
struct FixtureFile {
    issues: HashMap<String, FixtureIssue>,
}

/// In-memory issue store keyed by canonical identifier.
///
/// Backs the `--mock` demo and the tests. Keys listed with
/// [`FixtureSource::fail_on`] return an upstream error; every `get_issue`
/// call is counted so tests can assert a key was fetched once.
#[derive(Debug, Default)]
pub struct FixtureSource {
    issues: HashMap<String, FixtureIssue>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    fetches: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON fixture format: `{"issues": {"owner/repo/1": {...}}}`.
    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        let file: FixtureFile = serde_json::from_str(json)?;
        let mut source = Self::new();
        for (key, issue) in file.issues {
            let id = Identifier::parse(&key).map_err(|e| SourceError::Upstream {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            source.issues.insert(id.key(), issue);
        }
        Ok(source)
    }

    pub fn load_from(path: &Path) -> Result<Self, SourceError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Add an issue with the given body.
    pub fn with_issue(mut self, key: &str, body: &str) -> Self {
        self.issues.insert(
            canonical(key),
            FixtureIssue {
                title: format!("Issue {key}"),
                body: body.to_string(),
                html_url: format!("https://github.com/{}", html_path(key, "issues")),
                ..FixtureIssue::default()
            },
        );
        self
    }

    /// Add a pull request with the given body and raw diff.
    pub fn with_pull_request(mut self, key: &str, body: &str, diff: &str) -> Self {
        self.issues.insert(
            canonical(key),
            FixtureIssue {
                title: format!("PR {key}"),
                body: body.to_string(),
                is_pull_request: true,
                html_url: format!("https://github.com/{}", html_path(key, "pull")),
                diff: diff.to_string(),
                ..FixtureIssue::default()
            },
        );
        self
    }

    /// Append a comment to an already-added issue.
    pub fn with_comment(mut self, key: &str, author: &str, body: &str) -> Self {
        if let Some(issue) = self.issues.get_mut(&canonical(key)) {
            let id = issue.comments.len() as u64 + 1;
            issue.comments.push(Comment {
                id,
                author: author.to_string(),
                body: body.to_string(),
            });
        }
        self
    }

    /// Append a changed-file entry to an already-added pull request.
    pub fn with_changed_file(mut self, key: &str, file: ChangedFile) -> Self {
        if let Some(issue) = self.issues.get_mut(&canonical(key)) {
            issue.files.push(file);
        }
        self
    }

    /// Make every call for `key` fail.
    pub fn fail_on(mut self, key: &str) -> Self {
        self.failing.insert(canonical(key));
        self
    }

    /// Sleep this long inside each `get_issue`, so concurrent fetches overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `get_issue` was called for `key`.
    #[cfg(test)]
    pub fn fetch_count(&self, key: &str) -> usize {
        self.fetches
            .lock()
            .map(|f| f.get(&canonical(key)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Highest number of simultaneous `get_issue` calls observed.
    #[cfg(test)]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lookup(&self, id: &Identifier) -> Result<&FixtureIssue, SourceError> {
        let key = id.key();
        if self.failing.contains(&key) {
            return Err(SourceError::Upstream {
                key,
                reason: "injected failure".to_string(),
            });
        }
        self.issues.get(&key).ok_or(SourceError::NotFound(key))
    }
}

#[async_trait]
impl IssueSource for FixtureSource {
    async fn get_issue(&self, id: &Identifier) -> Result<Issue, SourceError> {
        if let Ok(mut fetches) = self.fetches.lock() {
            *fetches.entry(id.key()).or_insert(0) += 1;
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let issue = self.lookup(id)?;
        Ok(Issue {
            title: issue.title.clone(),
            body: issue.body.clone(),
            is_pull_request: issue.is_pull_request,
            html_url: issue.html_url.clone(),
        })
    }

    async fn list_comments(&self, id: &Identifier) -> Result<Vec<Comment>, SourceError> {
        Ok(self.lookup(id)?.comments.clone())
    }

    async fn get_diff(&self, id: &Identifier) -> Result<String, SourceError> {
        Ok(self.lookup(id)?.diff.clone())
    }

    async fn list_changed_files(&self, id: &Identifier) -> Result<Vec<ChangedFile>, SourceError> {
        Ok(self.lookup(id)?.files.clone())
    }

    async fn list_review_comments(&self, id: &Identifier) -> Result<Vec<Comment>, SourceError> {
        Ok(self.lookup(id)?.review_comments.clone())
    }
}

/// Canonical form of a test key; unparseable keys are stored verbatim and
/// simply never match a lookup.
fn canonical(key: &str) -> String {
    Identifier::parse(key)
        .map(|id| id.key())
        .unwrap_or_else(|_| key.to_string())
}

fn html_path(key: &str, kind: &str) -> String {
    match Identifier::parse(key) {
        Ok(id) => format!("{}/{}/{}/{}", id.owner, id.repo, kind, id.number),
        Err(_) => key.to_string(),
    }
}
