use std::fmt;

use percent_encoding::percent_decode_str;

use super::ReferenceError;

/// Canonical `(owner, repo, number)` triple naming one issue or pull request.
///
/// Equality and hashing go through the canonical key `owner/repo/number`,
/// so two identifiers built from differently-spelled inputs compare equal
/// once canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl Identifier {
    /// Build an identifier from already-split parts, validating the grammar.
    pub fn new(owner: &str, repo: &str, number: &str) -> Result<Self, ReferenceError> {
        if !is_valid_name(owner) || owner.eq_ignore_ascii_case("issues") {
            return Err(ReferenceError::InvalidOwner(owner.to_string()));
        }
        if !is_valid_name(repo) {
            return Err(ReferenceError::InvalidRepo(repo.to_string()));
        }
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ReferenceError::InvalidNumber(number.to_string()));
        }
        let number = number
            .parse::<u64>()
            .map_err(|_| ReferenceError::InvalidNumber(number.to_string()))?;

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        })
    }

    /// Parse any of the accepted spellings:
    ///
    /// - canonical key `owner/repo/number` (duplicate or trailing separators
    ///   and percent-encoding are tolerated)
    /// - shorthand `owner/repo#number`
    /// - a GitHub URL `https://github.com/{owner}/{repo}/(issues|pull)/{number}`
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let trimmed = input.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Self::from_url(trimmed);
        }

        let decoded = percent_decode_str(trimmed).decode_utf8_lossy();
        if let Some((repo_path, number)) = decoded.split_once('#') {
            let segments = canonical_segments(repo_path);
            if let [owner, repo] = segments.as_slice() {
                return Self::new(owner, repo, number);
            }
            return Err(ReferenceError::Malformed(input.to_string()));
        }

        match canonical_segments(&decoded).as_slice() {
            [owner, repo, number] => Self::new(owner, repo, number),
            _ => Err(ReferenceError::Malformed(input.to_string())),
        }
    }

    fn from_url(url: &str) -> Result<Self, ReferenceError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|_| ReferenceError::Malformed(url.to_string()))?;
        let path = percent_decode_str(parsed.path()).decode_utf8_lossy();

        match canonical_segments(&path).as_slice() {
            [owner, repo, kind, number] if matches!(*kind, "issues" | "pull" | "pulls") => {
                Self::new(owner, repo, number)
            }
            _ => Err(ReferenceError::Malformed(url.to_string())),
        }
    }

    /// Canonical key `owner/repo/number`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.owner, self.repo, self.number)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.repo, self.number)
    }
}

/// Which pattern produced a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReferenceKind {
    Url,
    CrossRepo,
    LocalHash,
    ResolutionKeyword,
    DependencyKeyword,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Url => write!(f, "url"),
            ReferenceKind::CrossRepo => write!(f, "cross-repo"),
            ReferenceKind::LocalHash => write!(f, "local"),
            ReferenceKind::ResolutionKeyword => write!(f, "resolution"),
            ReferenceKind::DependencyKeyword => write!(f, "dependency"),
        }
    }
}

/// An identifier plus the pattern that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub identifier: Identifier,
    pub kind: ReferenceKind,
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Split on `/`, dropping the empty segments left by duplicate, leading or
/// trailing separators.
fn canonical_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
