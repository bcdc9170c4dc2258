use std::collections::{HashMap, HashSet};

use crate::diff::PackedDiff;
use crate::reference::{Identifier, ReferenceKind};
use crate::source::{ChangedFile, Comment};

/// Pull-request-only part of a node.
#[derive(Debug, Clone, Default)]
pub struct PullRequestPayload {
    /// Packed diff, `None` when no file fit the budget or the diff was unavailable
    pub diff: Option<PackedDiff>,
    pub files: Vec<ChangedFile>,
}

/// One fetched issue or pull request.
///
/// The parent is held as a key (a back-reference into the arena, never an
/// owner); children are an owned, ordered list of keys.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub identifier: Identifier,
    pub title: String,
    pub html_url: String,
    pub body: String,
    pub comments: Vec<Comment>,
    pub pull_request: Option<PullRequestPayload>,
    /// Hops from the root it was reached from (roots are 0)
    pub depth: usize,
    /// Node that first discovered this one
    pub parent: Option<String>,
    /// How the parent referred to this node
    pub via: Option<ReferenceKind>,
    pub children: Vec<String>,
    /// Tokens charged to the budget for this node during traversal: its
    /// rendered text plus its packed diff
    pub reserved_tokens: usize,
}

impl GraphNode {
    pub fn key(&self) -> String {
        self.identifier.key()
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    /// Append comments from a second listing (review threads). Exact
    /// duplicates of comments already present are skipped.
    pub fn merge_comments(&mut self, extra: Vec<Comment>) {
        let mut seen: HashSet<String> = self.comments.iter().map(|c| c.body.clone()).collect();
        for comment in extra {
            if seen.insert(comment.body.clone()) {
                self.comments.push(comment);
            }
        }
    }
}

/// Result of one traversal: an arena of nodes keyed by canonical identifier.
#[derive(Debug, Clone, Default)]
pub struct ContextGraph {
    pub(crate) nodes: HashMap<String, GraphNode>,
    pub(crate) roots: Vec<String>,
    pub(crate) failed: Vec<String>,
}

impl ContextGraph {
    pub fn get(&self, key: &str) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    /// Successfully resolved roots: the requested root first, then seeds.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Keys whose fetch failed, sorted.
    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    /// All nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children<'a>(&'a self, node: &'a GraphNode) -> impl Iterator<Item = &'a GraphNode> + 'a {
        node.children.iter().filter_map(|key| self.nodes.get(key))
    }

    /// Tokens charged to the budget during traversal, across all nodes.
    pub fn reserved_tokens(&self) -> usize {
        self.nodes.values().map(|n| n.reserved_tokens).sum()
    }
}
