use serde::{Deserialize, Deserializer};

/// Issue or pull request metadata returned by the source.
/// Constructed from the REST issue payload; `is_pull_request` comes from the
/// presence of its `pull_request` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub title: String,
    /// Raw markdown body; GitHub sends `null` for an empty body
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
    #[serde(default)]
    pub is_pull_request: bool,
    #[serde(default)]
    pub html_url: String,
}

/// A single discussion comment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
}

/// One entry of a pull request's changed-file list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub additions: usize,
    pub deletions: usize,
    /// `added`, `modified`, `removed`, `renamed`, ...
    pub status: String,
}

/// Read a string field that may be `null`, mapping `null` to `""`.
pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
