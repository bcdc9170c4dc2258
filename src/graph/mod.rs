pub mod types;

pub use types::{ContextGraph, GraphNode, PullRequestPayload};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::budget::{TokenBudget, TokenCounter};
use crate::diff;
use crate::render;
use crate::reference::{Identifier, ReferenceExtractor, ReferenceKind};
use crate::source::{IssueSource, SourceError};

/// Limits for one traversal.
#[derive(Debug, Clone, Copy)]
pub struct TraversalOptions {
    /// Deepest hop followed (roots are depth 0)
    pub max_depth: usize,
    /// Child resolutions in flight per fan-out
    pub concurrency_limit: usize,
    /// Per pull request cap on packed diff tokens
    pub diff_token_limit: Option<usize>,
    /// Fraction of the remaining budget one pull request's diff may take
    pub diff_budget_share: f64,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            concurrency_limit: 10,
            diff_token_limit: None,
            diff_budget_share: 0.5,
        }
    }
}

/// Mutable state of one traversal. A key lives in at most one of the three
/// sets: `in_progress` while its node is being resolved, then `visited` or
/// `failed` for the rest of the traversal.
#[derive(Debug, Default)]
struct TraversalState {
    visited: HashSet<String>,
    failed: HashSet<String>,
    in_progress: HashSet<String>,
    nodes: HashMap<String, GraphNode>,
    roots: Vec<String>,
}

impl TraversalState {
    fn is_known(&self, key: &str) -> bool {
        self.visited.contains(key) || self.failed.contains(key) || self.in_progress.contains(key)
    }
}

struct Shared {
    source: Arc<dyn IssueSource>,
    counter: Arc<dyn TokenCounter>,
    extractor: ReferenceExtractor,
    options: TraversalOptions,
    budget: Mutex<TokenBudget>,
    state: Mutex<TraversalState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TraversalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn budget(&self) -> MutexGuard<'_, TokenBudget> {
        self.budget.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

type Resolution = Pin<Box<dyn Future<Output = Option<String>> + Send>>;

/// Recursive, cycle-safe fetcher that turns root identifiers into a
/// [`ContextGraph`].
///
/// Each key is fetched at most once per traversal. A node is registered in
/// the arena before its references are followed, so a reference back to a
/// node still being resolved ends the branch instead of re-entering it.
/// Sibling references are resolved concurrently, at most
/// `concurrency_limit` at a time. Fetch failures are logged and recorded;
/// they never abort siblings or the parent.
pub struct GraphFetcher {
    shared: Arc<Shared>,
}

impl GraphFetcher {
    pub fn new(
        source: Arc<dyn IssueSource>,
        counter: Arc<dyn TokenCounter>,
        extractor: ReferenceExtractor,
        budget: TokenBudget,
        options: TraversalOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                counter,
                extractor,
                options,
                budget: Mutex::new(budget),
                state: Mutex::new(TraversalState::default()),
            }),
        }
    }

    /// Resolve `root` and everything reachable from it. Returns the root's key,
    /// or `None` when the root itself could not be fetched.
    pub async fn resolve(&self, root: &Identifier) -> Option<String> {
        self.resolve_all(vec![root.clone()]).await.into_iter().next().flatten()
    }

    /// Resolve several depth-0 roots sharing this traversal's sets.
    /// Results are in input order.
    pub async fn resolve_all(&self, roots: Vec<Identifier>) -> Vec<Option<String>> {
        let targets = roots.into_iter().map(|id| (id, None)).collect();
        let resolved = fan_out(self.shared.clone(), targets, 0, None).await;

        let mut state = self.shared.state();
        for key in resolved.iter().flatten() {
            if !state.roots.contains(key) {
                state.roots.push(key.clone());
            }
        }
        resolved
    }

    /// Snapshot of the budget as charged so far.
    pub fn budget(&self) -> TokenBudget {
        self.shared.budget().clone()
    }

    /// Hand over the graph and the budget. The fetcher is empty afterwards.
    pub fn finish(&self) -> (ContextGraph, TokenBudget) {
        let state = std::mem::take(&mut *self.shared.state());
        let mut failed: Vec<String> = state.failed.into_iter().collect();
        failed.sort();
        let graph = ContextGraph {
            nodes: state.nodes,
            roots: state.roots,
            failed,
        };
        (graph, self.budget())
    }
}

/// Resolve `targets` as children of `parent`, admitting at most
/// `concurrency_limit` at once. Results are in target order.
async fn fan_out(
    shared: Arc<Shared>,
    targets: Vec<(Identifier, Option<ReferenceKind>)>,
    depth: usize,
    parent: Option<String>,
) -> Vec<Option<String>> {
    let limit = shared.options.concurrency_limit.max(1);
    let mut results = vec![None; targets.len()];
    let mut pending = targets.into_iter().enumerate();
    let mut join_set: JoinSet<(usize, Option<String>)> = JoinSet::new();

    loop {
        while join_set.len() < limit {
            let Some((index, (id, via))) = pending.next() else {
                break;
            };
            // Another branch may have finished this key since extraction.
            let visited = shared.state().visited.contains(&id.key());
            if visited {
                trace!(key = %id, "already visited, not recursing");
                continue;
            }
            let task = resolve_node(shared.clone(), id, depth, parent.clone(), via);
            join_set.spawn(async move { (index, task.await) });
        }

        match join_set.join_next().await {
            Some(Ok((index, resolved))) => results[index] = resolved,
            Some(Err(e)) => warn!(error = %e, "reference resolution task failed"),
            None => break,
        }
    }

    results
}

fn resolve_node(
    shared: Arc<Shared>,
    id: Identifier,
    depth: usize,
    parent: Option<String>,
    via: Option<ReferenceKind>,
) -> Resolution {
    let key = id.key();
    let span = debug_span!("resolve", key = %key, depth);
    Box::pin(
        async move {
            if depth > shared.options.max_depth {
                trace!("beyond max depth");
                return None;
            }

            {
                let mut state = shared.state();
                if state.in_progress.contains(&key) {
                    debug!("cycle: node is already being resolved");
                    return None;
                }
                if state.is_known(&key) {
                    trace!("already visited or failed");
                    return None;
                }
                state.in_progress.insert(key.clone());
            }

            let mut node = match fetch_node(&shared, &id, depth).await {
                Ok(node) => node,
                Err(e) => {
                    warn!(error = %e, "failed to fetch, dropping branch");
                    let mut state = shared.state();
                    state.in_progress.remove(&key);
                    state.failed.insert(key);
                    return None;
                }
            };
            node.parent = parent;
            node.via = via;

            let references = if depth < shared.options.max_depth {
                let texts = std::iter::once(node.body.as_str())
                    .chain(node.comments.iter().map(|c| c.body.as_str()));
                shared.extractor.extract_all(texts, &id)
            } else {
                Vec::new()
            };

            // Register before recursing so back-references find this node in progress.
            let targets: Vec<(Identifier, Option<ReferenceKind>)> = {
                let mut state = shared.state();
                state.nodes.insert(key.clone(), node);
                references
                    .into_iter()
                    .filter(|r| !state.is_known(&r.identifier.key()))
                    .map(|r| (r.identifier, Some(r.kind)))
                    .collect()
            };
            debug!(references = targets.len(), "following references");

            let children: Vec<String> = fan_out(shared.clone(), targets, depth + 1, Some(key.clone()))
                .await
                .into_iter()
                .flatten()
                .collect();

            let mut state = shared.state();
            if let Some(node) = state.nodes.get_mut(&key) {
                node.children = children;
            }
            state.in_progress.remove(&key);
            state.visited.insert(key.clone());
            Some(key)
        }
        .instrument(span),
    )
}

/// Fetch one node's issue, comments and, for pull requests, the review
/// comments, changed files and packed diff. Only the issue and comment
/// listing are required; pull request extras degrade to empty.
///
/// The node's rendered text is charged to the budget before its diff is
/// packed, and the diff may take at most `diff_budget_share` of what is left
/// after that, so one large diff cannot crowd out the rest of the context.
async fn fetch_node(shared: &Shared, id: &Identifier, depth: usize) -> Result<GraphNode, SourceError> {
    let source = &shared.source;
    let issue = source.get_issue(id).await?;
    let comments = source.list_comments(id).await?;

    let mut node = GraphNode {
        identifier: id.clone(),
        title: issue.title,
        html_url: issue.html_url,
        body: issue.body,
        comments,
        pull_request: None,
        depth,
        parent: None,
        via: None,
        children: Vec::new(),
        reserved_tokens: 0,
    };

    let mut raw_diff = None;
    if issue.is_pull_request {
        match source.list_review_comments(id).await {
            Ok(review) => node.merge_comments(review),
            Err(e) => warn!(error = %e, "review comments unavailable"),
        }

        let files = source.list_changed_files(id).await.unwrap_or_else(|e| {
            warn!(error = %e, "changed files unavailable");
            Vec::new()
        });
        node.pull_request = Some(PullRequestPayload { diff: None, files });

        raw_diff = match source.get_diff(id).await {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!(error = %e, "diff unavailable");
                None
            }
        };
    }

    let counter = shared.counter.as_ref();
    let text_tokens = render::block_tokens(&node, depth, counter);
    let mut budget = shared.budget();
    budget.charge(text_tokens);
    node.reserved_tokens = text_tokens;

    if let (Some(raw), Some(pr)) = (raw_diff, node.pull_request.as_mut()) {
        let share = (budget.available() as f64 * shared.options.diff_budget_share).floor() as usize;
        let cap = shared.options.diff_token_limit.map_or(share, |limit| limit.min(share));
        pr.diff = match diff::pack(&raw, &mut budget, counter, Some(cap), &render::diff_line_prefix(depth)) {
            Ok(packed) => packed,
            Err(e) => {
                warn!(error = %e, "diff could not be split");
                None
            }
        };
        match &pr.diff {
            Some(packed) => node.reserved_tokens += packed.tokens,
            None => debug!(cap, "diff omitted"),
        }
    }
    trace!(tokens = node.reserved_tokens, remaining = budget.tokens_remaining(), "node reserved");

    Ok(node)
}
