pub mod types;

pub use types::{Identifier, Reference, ReferenceKind};

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("Malformed issue reference: {0}")]
    Malformed(String),

    #[error("Invalid repository owner: {0}")]
    InvalidOwner(String),

    #[error("Invalid repository name: {0}")]
    InvalidRepo(String),

    #[error("Invalid issue number: {0}")]
    InvalidNumber(String),
}

/// Issue or pull request URL on any host. The number group is deliberately
/// loose so non-numeric paths are rejected by validation, not silently cut.
static ISSUE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"https?://[A-Za-z0-9.-]+(?::[0-9]+)?/([^/\s#?)\]>"']+)/([^/\s#?)\]>"']+)/(?:issues|pull|pulls)/([^/\s#?)\]>"'.,;:]+)"#,
    )
    .unwrap()
});

static CROSS_REPO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)#([0-9A-Za-z]+)").unwrap());

static LOCAL_HASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([0-9]+)").unwrap());

static RESOLUTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s*:?\s+#([0-9]+)").unwrap()
});

static DEPENDENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdepends\s+on\s*:?\s+(#[0-9]+|https?://\S+)").unwrap());

/// Phrases that mark text as issue or pull request template boilerplate.
pub const DEFAULT_PLACEHOLDER_MARKERS: &[&str] = &[
    "<!--",
    "e.g.",
    "for example",
    "link the issue",
    "link to the issue",
    "issue number",
];

/// A match before merging: text offset decides output order, kind breaks ties.
struct Candidate {
    offset: usize,
    reference: Reference,
}

/// What `#number` forms in one text resolve against.
struct LocalScope<'a> {
    current: &'a Identifier,
    /// The text carries a placeholder marker
    in_template: bool,
}

/// Pulls issue and pull request identifiers out of free text.
///
/// Pure: no network access. Local `#number` references are resolved against
/// the identifier whose text is being scanned.
#[derive(Debug, Clone, Default)]
pub struct ReferenceExtractor {
    placeholder_numbers: HashSet<u64>,
    /// Lowercased
    placeholder_markers: Vec<String>,
}

impl ReferenceExtractor {
    /// `placeholder_numbers` are example issue numbers found in template
    /// boilerplate ("Fixes #1234"). Local references to them are ignored in
    /// text that carries one of the placeholder markers, and followed
    /// everywhere else.
    pub fn new(placeholder_numbers: impl IntoIterator<Item = u64>) -> Self {
        Self {
            placeholder_numbers: placeholder_numbers.into_iter().collect(),
            placeholder_markers: Vec::new(),
        }
        .with_placeholder_markers(DEFAULT_PLACEHOLDER_MARKERS.iter().copied())
    }

    /// Replace the phrases that identify template boilerplate. Matching is
    /// case-insensitive.
    pub fn with_placeholder_markers<S: AsRef<str>>(mut self, markers: impl IntoIterator<Item = S>) -> Self {
        self.placeholder_markers = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    fn is_template(&self, text: &str) -> bool {
        if self.placeholder_numbers.is_empty() || self.placeholder_markers.is_empty() {
            return false;
        }
        let lowered = text.to_lowercase();
        self.placeholder_markers.iter().any(|m| lowered.contains(m.as_str()))
    }

    /// Extract the deduplicated references in `text`, in order of first
    /// occurrence. References to `current` itself are dropped.
    pub fn extract(&self, text: &str, current: &Identifier) -> Vec<Reference> {
        let local = LocalScope {
            current,
            in_template: self.is_template(text),
        };
        let mut candidates = Vec::new();
        self.collect_urls(text, &mut candidates);
        self.collect_cross_repo(text, &mut candidates);
        self.collect_local(text, &local, &mut candidates);
        self.collect_resolution(text, &local, &mut candidates);
        self.collect_dependency(text, &local, &mut candidates);

        candidates.sort_by(|a, b| {
            a.offset
                .cmp(&b.offset)
                .then(a.reference.kind.cmp(&b.reference.kind))
        });

        let mut seen = HashSet::new();
        let mut references = Vec::new();
        for candidate in candidates {
            let key = candidate.reference.identifier.key();
            if candidate.reference.identifier == *current || !seen.insert(key) {
                continue;
            }
            references.push(candidate.reference);
        }
        trace!(found = references.len(), "extracted references");
        references
    }

    /// Union of the references in several texts (a body and its comments),
    /// deduplicated across all of them.
    pub fn extract_all<'a>(
        &self,
        texts: impl IntoIterator<Item = &'a str>,
        current: &Identifier,
    ) -> Vec<Reference> {
        let mut seen = HashSet::new();
        texts
            .into_iter()
            .flat_map(|text| self.extract(text, current))
            .filter(|r| seen.insert(r.identifier.key()))
            .collect()
    }

    fn collect_urls(&self, text: &str, out: &mut Vec<Candidate>) {
        for caps in ISSUE_URL.captures_iter(text) {
            let (Some(whole), Some(owner), Some(repo), Some(number)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };
            if let Ok(identifier) = Identifier::new(owner.as_str(), repo.as_str(), number.as_str()) {
                out.push(Candidate {
                    offset: whole.start(),
                    reference: Reference {
                        identifier,
                        kind: ReferenceKind::Url,
                    },
                });
            }
        }
    }

    fn collect_cross_repo(&self, text: &str, out: &mut Vec<Candidate>) {
        for caps in CROSS_REPO.captures_iter(text) {
            let (Some(whole), Some(owner), Some(repo), Some(number)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };
            // Inside a URL path or a longer path, not a shorthand.
            if matches!(preceding_char(text, whole.start()), Some(c) if c == '/' || c == ':' || is_word(c))
            {
                continue;
            }
            if let Ok(identifier) = Identifier::new(owner.as_str(), repo.as_str(), number.as_str()) {
                out.push(Candidate {
                    offset: whole.start(),
                    reference: Reference {
                        identifier,
                        kind: ReferenceKind::CrossRepo,
                    },
                });
            }
        }
    }

    fn collect_local(&self, text: &str, local: &LocalScope, out: &mut Vec<Candidate>) {
        for caps in LOCAL_HASH.captures_iter(text) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if matches!(preceding_char(text, whole.start()), Some(c) if c == '/' || c == '&' || is_word(c))
            {
                continue;
            }
            if matches!(text[whole.end()..].chars().next(), Some(c) if is_word(c)) {
                continue;
            }
            if let Some(reference) = self.local_reference(number.as_str(), local, ReferenceKind::LocalHash) {
                out.push(Candidate {
                    offset: whole.start(),
                    reference,
                });
            }
        }
    }

    fn collect_resolution(&self, text: &str, local: &LocalScope, out: &mut Vec<Candidate>) {
        for caps in RESOLUTION.captures_iter(text) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if matches!(text[whole.end()..].chars().next(), Some(c) if is_word(c)) {
                continue;
            }
            if let Some(reference) =
                self.local_reference(number.as_str(), local, ReferenceKind::ResolutionKeyword)
            {
                out.push(Candidate {
                    offset: whole.start(),
                    reference,
                });
            }
        }
    }

    fn collect_dependency(&self, text: &str, local: &LocalScope, out: &mut Vec<Candidate>) {
        for caps in DEPENDENCY.captures_iter(text) {
            let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let target = target.as_str();
            let reference = if let Some(number) = target.strip_prefix('#') {
                self.local_reference(number, local, ReferenceKind::DependencyKeyword)
            } else {
                ISSUE_URL.captures(target).and_then(|url| {
                    let identifier = Identifier::new(
                        url.get(1)?.as_str(),
                        url.get(2)?.as_str(),
                        url.get(3)?.as_str(),
                    )
                    .ok()?;
                    Some(Reference {
                        identifier,
                        kind: ReferenceKind::DependencyKeyword,
                    })
                })
            };
            if let Some(reference) = reference {
                out.push(Candidate {
                    offset: whole.start(),
                    reference,
                });
            }
        }
    }

    fn local_reference(
        &self,
        number: &str,
        local: &LocalScope,
        kind: ReferenceKind,
    ) -> Option<Reference> {
        let current = local.current;
        let identifier = Identifier::new(&current.owner, &current.repo, number).ok()?;
        if local.in_template && self.placeholder_numbers.contains(&identifier.number) {
            trace!(number = identifier.number, "skipping template placeholder reference");
            return None;
        }
        Some(Reference { identifier, kind })
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn preceding_char(text: &str, offset: usize) -> Option<char> {
    text[..offset].chars().next_back()
}
