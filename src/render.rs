use std::collections::HashSet;

use tracing::{debug, info};

use crate::budget::{TokenBudget, TokenCounter};
use crate::graph::{ContextGraph, GraphNode};

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const PIPE: &str = "│   ";
const SPACE: &str = "    ";

/// Rendered graph ready to be placed in a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContext {
    /// One block per node in depth-first order, or a single placeholder
    pub blocks: Vec<String>,
    /// Tokens charged for `blocks`
    pub tokens: usize,
    /// The full rendering did not fit and was replaced by the placeholder
    pub exceeded: bool,
}

impl RenderedContext {
    pub fn text(&self) -> String {
        self.blocks.concat()
    }
}

/// Serialize `graph` depth-first into text blocks under the budget.
///
/// Tokens reserved for each node during traversal are released first,
/// because the rendered text contains that same content. The whole rendering is then counted
/// once: if it fits it is charged and returned, otherwise a single
/// placeholder block is charged and returned instead.
pub fn render(graph: &ContextGraph, budget: &mut TokenBudget, counter: &dyn TokenCounter) -> RenderedContext {
    budget.release(graph.reserved_tokens());

    let blocks = render_blocks(graph);
    let tokens = counter.count(&blocks.concat());

    if budget.try_consume(tokens) {
        debug!(blocks = blocks.len(), tokens, "rendered context fits");
        return RenderedContext {
            blocks,
            tokens,
            exceeded: false,
        };
    }

    info!(
        needed = tokens,
        available = budget.available(),
        "rendered context exceeds budget, emitting placeholder"
    );
    let placeholder = format!(
        "[Linked issue context omitted: it needs {tokens} tokens but only {} remain in the budget.]\n",
        budget.available()
    );
    let placeholder_tokens = counter.count(&placeholder);
    budget.charge(placeholder_tokens);
    RenderedContext {
        blocks: vec![placeholder],
        tokens: placeholder_tokens,
        exceeded: true,
    }
}

/// Tokens `node` takes when rendered at `depth`, packed diff text excluded.
///
/// Uses the widest connectors, so it does not undercount for any position
/// among its siblings.
pub fn block_tokens(node: &GraphNode, depth: usize, counter: &dyn TokenCounter) -> usize {
    let indent = PIPE.repeat(depth);
    let lead = match depth {
        0 => String::new(),
        _ => format!("{}{BRANCH}", PIPE.repeat(depth - 1)),
    };
    counter.count(&node_block(node, &lead, &indent, None))
}

/// What precedes every diff line of a node at `depth`.
pub fn diff_line_prefix(depth: usize) -> String {
    format!("{}  ", PIPE.repeat(depth))
}

/// Depth-first blocks for every root, without any budget check.
pub fn render_blocks(graph: &ContextGraph) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut seen = HashSet::new();
    for (i, key) in graph.roots().iter().enumerate() {
        if let Some(root) = graph.get(key) {
            let label = if i == 0 { None } else { Some("similar") };
            render_node(graph, root, "", "", label, &mut seen, &mut blocks);
        }
    }
    blocks
}

fn render_node(
    graph: &ContextGraph,
    node: &GraphNode,
    lead: &str,
    indent: &str,
    label: Option<&str>,
    seen: &mut HashSet<String>,
    blocks: &mut Vec<String>,
) {
    if !seen.insert(node.key()) {
        return;
    }
    blocks.push(node_block(node, lead, indent, label));

    let children: Vec<&GraphNode> = graph.children(node).collect();
    let count = children.len();
    for (i, child) in children.into_iter().enumerate() {
        let last = i + 1 == count;
        let child_lead = format!("{indent}{}", if last { LAST_BRANCH } else { BRANCH });
        let child_indent = format!("{indent}{}", if last { SPACE } else { PIPE });
        render_node(graph, child, &child_lead, &child_indent, None, seen, blocks);
    }
}

fn node_block(node: &GraphNode, lead: &str, indent: &str, label: Option<&str>) -> String {
    let id = &node.identifier;
    let kind = if node.is_pull_request() {
        "Pull Request"
    } else {
        "Issue"
    };
    let mut out = String::new();

    let mut header = format!("{lead}{kind} {}/{}#{}", id.owner, id.repo, id.number);
    if !node.title.is_empty() {
        header.push_str(&format!(": {}", node.title));
    }
    if let Some(label) = label {
        header.push_str(&format!(" ({label})"));
    }
    push_line(&mut out, "", &header);

    if !node.html_url.is_empty() {
        push_line(&mut out, indent, &format!("URL: {}", node.html_url));
    }
    match (node.via, node.parent.as_deref()) {
        (Some(via), Some(parent)) => {
            push_line(&mut out, indent, &format!("Referenced as: {via} (from {parent})"))
        }
        (Some(via), None) => push_line(&mut out, indent, &format!("Referenced as: {via}")),
        _ => {}
    }

    push_line(&mut out, indent, "Body:");
    push_text(&mut out, indent, &node.body);

    if let Some(pr) = &node.pull_request {
        if !pr.files.is_empty() {
            push_line(&mut out, indent, "Files changed:");
            for file in &pr.files {
                push_line(
                    &mut out,
                    indent,
                    &format!(
                        "  {} (+{} -{}, {})",
                        file.filename, file.additions, file.deletions, file.status
                    ),
                );
            }
        }
        match &pr.diff {
            Some(diff) => {
                push_line(&mut out, indent, "Diff:");
                push_text(&mut out, indent, &diff.text);
                if !diff.omitted.is_empty() {
                    push_line(
                        &mut out,
                        indent,
                        &format!("  ({} more files omitted to fit the token budget)", diff.omitted.len()),
                    );
                }
            }
            None => push_line(&mut out, indent, "Diff: omitted to fit the token budget"),
        }
    }

    let comments = unique_comments(node);
    if !comments.is_empty() {
        push_line(&mut out, indent, "Comments:");
        for (author, body) in comments {
            let mut lines = body.lines();
            let first = lines.next().unwrap_or_default();
            push_line(&mut out, indent, &format!("  - {author}: {first}"));
            for line in lines {
                push_line(&mut out, indent, &format!("    {line}"));
            }
        }
    }

    push_line(&mut out, indent, "");
    out
}

/// Comments in order, dropping exact repeats and echoes of the node's body.
fn unique_comments(node: &GraphNode) -> Vec<(&str, &str)> {
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(node.body.as_str());
    node.comments
        .iter()
        .filter(|c| !c.body.trim().is_empty())
        .filter(|c| seen.insert(c.body.as_str()))
        .map(|c| (c.author.as_str(), c.body.as_str()))
        .collect()
}

fn push_text(out: &mut String, indent: &str, text: &str) {
    for line in text.lines() {
        push_line(out, indent, &format!("  {line}"));
    }
}

fn push_line(out: &mut String, indent: &str, line: &str) {
    let full = format!("{indent}{line}");
    out.push_str(full.trim_end());
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::HeuristicCounter;
    use crate::diff::PackedDiff;
    use crate::graph::PullRequestPayload;
    use crate::reference::{Identifier, ReferenceKind};
    use crate::source::{ChangedFile, Comment};

    fn node(key: &str, body: &str) -> GraphNode {
        GraphNode {
            identifier: Identifier::parse(key).unwrap(),
            title: format!("Title {key}"),
            html_url: String::new(),
            body: body.to_string(),
            comments: Vec::new(),
            pull_request: None,
            depth: 0,
            parent: None,
            via: None,
            children: Vec::new(),
            reserved_tokens: 0,
        }
    }

    fn comment(author: &str, body: &str) -> Comment {
        Comment {
            id: 0,
            author: author.to_string(),
            body: body.to_string(),
        }
    }

    fn graph_of(nodes: Vec<GraphNode>, roots: &[&str]) -> ContextGraph {
        let mut graph = ContextGraph::default();
        for n in nodes {
            graph.nodes.insert(n.key(), n);
        }
        graph.roots = roots.iter().map(|r| r.to_string()).collect();
        graph
    }

    fn link(parent: &mut GraphNode, child: &mut GraphNode) {
        parent.children.push(child.key());
        child.parent = Some(parent.key());
        child.depth = parent.depth + 1;
        child.via = Some(ReferenceKind::LocalHash);
    }

    fn roomy_budget() -> TokenBudget {
        TokenBudget::new(100_000, 1_000).unwrap()
    }

    fn leading_width(line: &str) -> usize {
        line.chars().take_while(|c| !c.is_alphanumeric()).count()
    }

    #[test]
    fn test_two_node_chain_order_and_indent() {
        let mut root = node("acme/app/1", "root body");
        let mut child = node("acme/app/2", "child body");
        link(&mut root, &mut child);
        let graph = graph_of(vec![root, child], &["acme/app/1"]);

        let rendered = render(&graph, &mut roomy_budget(), &HeuristicCounter);
        assert!(!rendered.exceeded);
        assert_eq!(rendered.blocks.len(), 2);

        let text = rendered.text();
        let root_at = text.find("Issue acme/app#1").unwrap();
        let child_at = text.find("Issue acme/app#2").unwrap();
        assert!(root_at < child_at);

        let root_body = text.lines().find(|l| l.contains("root body")).unwrap();
        let child_body = text.lines().find(|l| l.contains("child body")).unwrap();
        assert!(leading_width(child_body) > leading_width(root_body));
        assert!(text.contains("└── Issue acme/app#2"));
        assert!(text.contains("Referenced as: local"));
    }

    #[test]
    fn test_last_child_marked_distinctly() {
        let mut root = node("acme/app/1", "root");
        let mut a = node("acme/app/2", "a");
        let mut b = node("acme/app/3", "b");
        link(&mut root, &mut a);
        link(&mut root, &mut b);
        let graph = graph_of(vec![root, a, b], &["acme/app/1"]);

        let text = render_blocks(&graph).concat();
        assert!(text.contains("├── Issue acme/app#2"));
        assert!(text.contains("└── Issue acme/app#3"));
        assert!(text.contains("│     a"));
    }

    #[test]
    fn test_comment_deduplication() {
        let mut root = node("acme/app/1", "the proposal text");
        root.comments = vec![
            comment("alice", "+1"),
            comment("bob", "+1"),
            comment("carol", "the proposal text"),
            comment("dave", "real question"),
        ];
        let graph = graph_of(vec![root], &["acme/app/1"]);

        let text = render_blocks(&graph).concat();
        assert_eq!(text.matches("+1").count(), 1);
        assert!(text.contains("- alice: +1"));
        assert!(!text.contains("bob"));
        assert!(!text.contains("carol"));
        assert_eq!(text.matches("the proposal text").count(), 1);
        assert!(text.contains("- dave: real question"));
    }

    #[test]
    fn test_pull_request_sections() {
        let mut pr = node("acme/app/5", "adds caching");
        pr.pull_request = Some(PullRequestPayload {
            diff: Some(PackedDiff {
                text: "diff --git a/c.rs b/c.rs\n+cache\n".to_string(),
                tokens: 10,
                included: vec!["c.rs".to_string()],
                omitted: vec!["big.rs".to_string()],
            }),
            files: vec![ChangedFile {
                filename: "c.rs".to_string(),
                additions: 1,
                deletions: 0,
                status: "modified".to_string(),
            }],
        });
        let graph = graph_of(vec![pr], &["acme/app/5"]);
        let text = render_blocks(&graph).concat();
        assert!(text.starts_with("Pull Request acme/app#5"));
        assert!(text.contains("c.rs (+1 -0, modified)"));
        assert!(text.contains("  diff --git a/c.rs b/c.rs"));
        assert!(text.contains("(1 more files omitted to fit the token budget)"));
    }

    #[test]
    fn test_over_budget_returns_single_placeholder() {
        let root = node("acme/app/1", &"long body ".repeat(200));
        let graph = graph_of(vec![root], &["acme/app/1"]);
        let mut budget = TokenBudget::new(200, 100).unwrap();

        let rendered = render(&graph, &mut budget, &HeuristicCounter);
        assert!(rendered.exceeded);
        assert_eq!(rendered.blocks.len(), 1);
        assert!(rendered.blocks[0].contains("omitted"));
        assert_eq!(budget.running_token_count(), rendered.tokens);
    }

    #[test]
    fn test_reserved_tokens_released_before_check() {
        let mut pr = node("acme/app/5", "");
        let diff_text = "diff --git a/x b/x\n+1\n".to_string();
        let diff_tokens = HeuristicCounter.count(&diff_text);
        pr.pull_request = Some(PullRequestPayload {
            diff: Some(PackedDiff {
                text: diff_text,
                tokens: diff_tokens,
                included: vec!["x".to_string()],
                omitted: Vec::new(),
            }),
            files: Vec::new(),
        });
        pr.reserved_tokens = diff_tokens;
        let graph = graph_of(vec![pr], &["acme/app/5"]);
        let needed = HeuristicCounter.count(&render_blocks(&graph).concat());

        let mut budget = TokenBudget::new(needed + 1, 1).unwrap();
        budget.charge(diff_tokens);
        let rendered = render(&graph, &mut budget, &HeuristicCounter);
        assert!(!rendered.exceeded);
        assert_eq!(budget.running_token_count(), needed);
        assert_eq!(budget.tokens_remaining(), 0);
    }

    #[test]
    fn test_block_tokens_cover_rendered_block() {
        let mut root = node("acme/app/1", "root body");
        let mut child = node("acme/app/2", "child body\nsecond line");
        link(&mut root, &mut child);
        let estimate = block_tokens(&child, 1, &HeuristicCounter);
        let graph = graph_of(vec![root, child], &["acme/app/1"]);

        let blocks = render_blocks(&graph);
        assert!(estimate >= HeuristicCounter.count(&blocks[1]));
        assert_eq!(diff_line_prefix(0), "  ");
        assert_eq!(diff_line_prefix(2), "│   │     ");
    }

    #[test]
    fn test_seed_roots_labelled() {
        let graph = graph_of(
            vec![node("acme/app/1", "main"), node("acme/app/9", "seed")],
            &["acme/app/1", "acme/app/9"],
        );
        let blocks = render_blocks(&graph);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].starts_with("Issue acme/app#9: Title acme/app/9 (similar)"));
    }
}
