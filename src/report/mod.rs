pub mod types;

pub use types::{ContextStatus, Report};

use crate::context::AssembledContext;
use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Build a Report from an assembled context and the final prompt text.
///
/// Status is OMITTED when the renderer fell back to its placeholder, PARTIAL
/// when any node failed or any diff file was dropped, COMPLETE otherwise.
pub fn build(ctx: &AssembledContext, prompt: String) -> Report {
    // A pull request with no packed diff lost all of its files.
    let omitted_diff_files: usize = ctx
        .graph
        .nodes()
        .filter_map(|node| node.pull_request.as_ref())
        .map(|pr| match &pr.diff {
            Some(diff) => diff.omitted.len(),
            None => pr.files.len().max(1),
        })
        .sum();

    let status = if ctx.rendered.exceeded {
        ContextStatus::Omitted
    } else if !ctx.graph.failed().is_empty() || omitted_diff_files > 0 {
        ContextStatus::Partial
    } else {
        ContextStatus::Complete
    };

    let root = ctx.root.key();
    Report {
        title: ctx
            .graph
            .get(&root)
            .map(|n| n.title.clone())
            .unwrap_or_default(),
        root,
        nodes: ctx.graph.len(),
        failed: ctx.graph.failed().to_vec(),
        seeds: ctx.graph.roots().len().saturating_sub(1),
        omitted_diff_files,
        tokens_used: ctx.budget.running_token_count(),
        tokens_remaining: ctx.budget.tokens_remaining(),
        model_max_token_limit: ctx.budget.model_max_token_limit(),
        completion_reserve: ctx.budget.max_completion_tokens(),
        status,
        prompt,
    }
}

/// Output the report to terminal (default) or to a markdown file.
#[instrument(skip(report), fields(root = %report.root, status = %report.status))]
pub fn output(report: &Report, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing report to terminal");
            print_terminal_report(report);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            write_markdown_report(report, path)
        }
    }
}

/// Summary on stderr, prompt on stdout so it can be piped on its own.
///
/// Context for acme/widgets/42: "Crash on save"
/// Nodes: 5 | Seeds: 1 | Failed: 0 | Diff files omitted: 2
/// Tokens: 9120 used / 114784 remaining of 128000 (4096 reserved for completion)
///
/// ═══ Context: PARTIAL ═══
fn print_terminal_report(report: &Report) {
    eprintln!();
    eprintln!("Context for {}: \"{}\"", report.root, report.title);
    eprintln!(
        "Nodes: {} | Seeds: {} | Failed: {} | Diff files omitted: {}",
        report.nodes,
        report.seeds,
        report.failed.len(),
        report.omitted_diff_files
    );
    for key in &report.failed {
        eprintln!("  • could not fetch {}", key);
    }
    eprintln!(
        "Tokens: {} used / {} remaining of {} ({} reserved for completion)",
        report.tokens_used,
        report.tokens_remaining,
        report.model_max_token_limit,
        report.completion_reserve
    );
    eprintln!();
    eprintln!("═══ Context: {} ═══", colorize_status(report.status));
    eprintln!();

    println!("{}", report.prompt);
}

/// Write the report as a markdown file.
///
/// # Context for acme/widgets/42: "Crash on save"
/// **Nodes:** 5 | **Seeds:** 1 | **Failed:** 0 | **Tokens:** 9120 / 128000 (4096 reserved)
///
/// ## Status: PARTIAL
///
/// ## Prompt
/// ````text
/// ...
/// ````
fn write_markdown_report(report: &Report, path: &Path) -> Result<(), ReportError> {
    let mut md = String::new();
    md.push_str(&format!("# Context for {}: \"{}\"\n\n", report.root, report.title));
    md.push_str(&format!(
        "**Nodes:** {} | **Seeds:** {} | **Failed:** {} | **Tokens:** {} / {} ({} reserved)\n\n",
        report.nodes,
        report.seeds,
        report.failed.len(),
        report.tokens_used,
        report.model_max_token_limit,
        report.completion_reserve
    ));

    md.push_str(&format!("## Status: {}\n\n", report.status));
    if !report.failed.is_empty() {
        for key in &report.failed {
            md.push_str(&format!("- could not fetch `{}`\n", key));
        }
        md.push('\n');
    }
    if report.omitted_diff_files > 0 {
        md.push_str(&format!(
            "{} diff files omitted to fit the token budget.\n\n",
            report.omitted_diff_files
        ));
    }

    // Four backticks so diff fences inside the prompt stay intact.
    md.push_str("## Prompt\n\n````text\n");
    md.push_str(&report.prompt);
    if !report.prompt.ends_with('\n') {
        md.push('\n');
    }
    md.push_str("````\n");

    std::fs::write(path, md)?;
    Ok(())
}

fn colorize_status(status: ContextStatus) -> colored::ColoredString {
    match status {
        ContextStatus::Omitted => "OMITTED".red().bold(),
        ContextStatus::Partial => "PARTIAL".yellow().bold(),
        ContextStatus::Complete => "COMPLETE".green().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::TokenBudget;
    use crate::graph::{ContextGraph, GraphNode, PullRequestPayload};
    use crate::reference::Identifier;
    use crate::render::RenderedContext;
    use crate::source::ChangedFile;

    fn sample_ctx(exceeded: bool) -> AssembledContext {
        AssembledContext {
            root: Identifier::parse("acme/widgets/42").unwrap(),
            graph: ContextGraph::default(),
            rendered: RenderedContext {
                blocks: vec!["Issue acme/widgets#42\n".to_string()],
                tokens: 5,
                exceeded,
            },
            budget: TokenBudget::new(1_000, 100).unwrap(),
            seeds: Vec::new(),
        }
    }

    #[test]
    fn test_build_status() {
        assert_eq!(build(&sample_ctx(false), String::new()).status, ContextStatus::Complete);
        assert_eq!(build(&sample_ctx(true), String::new()).status, ContextStatus::Omitted);
    }

    #[test]
    fn test_build_metadata() {
        let report = build(&sample_ctx(false), "prompt".to_string());
        assert_eq!(report.root, "acme/widgets/42");
        assert_eq!(report.nodes, 0);
        assert_eq!(report.seeds, 0);
        assert_eq!(report.tokens_remaining, 900);
        assert_eq!(report.completion_reserve, 100);
        assert_eq!(report.prompt, "prompt");
    }

    fn changed(filename: &str) -> ChangedFile {
        ChangedFile {
            filename: filename.to_string(),
            additions: 3,
            deletions: 1,
            status: "modified".to_string(),
        }
    }

    #[test]
    fn test_fully_dropped_diff_is_partial() {
        let mut ctx = sample_ctx(false);
        let pr = GraphNode {
            identifier: Identifier::parse("acme/widgets/43").unwrap(),
            title: "Big refactor".to_string(),
            html_url: String::new(),
            body: String::new(),
            comments: Vec::new(),
            pull_request: Some(PullRequestPayload {
                diff: None,
                files: vec![changed("src/a.rs"), changed("src/b.rs")],
            }),
            depth: 1,
            parent: None,
            via: None,
            children: Vec::new(),
            reserved_tokens: 0,
        };
        ctx.graph.nodes.insert(pr.key(), pr);

        let report = build(&ctx, String::new());
        assert_eq!(report.omitted_diff_files, 2);
        assert_eq!(report.status, ContextStatus::Partial);
    }

    #[test]
    fn test_write_markdown_report() {
        let mut report = build(&sample_ctx(false), "## Question\nwhy?\n".to_string());
        report.failed = vec!["acme/widgets/7".to_string()];
        report.status = ContextStatus::Partial;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.md");
        write_markdown_report(&report, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# Context for acme/widgets/42"));
        assert!(content.contains("**Tokens:** 0 / 1000 (100 reserved)"));
        assert!(content.contains("## Status: PARTIAL"));
        assert!(content.contains("- could not fetch `acme/widgets/7`"));
        assert!(content.contains("````text\n## Question\nwhy?\n````"));
    }

    #[test]
    fn test_output_to_file() {
        let report = build(&sample_ctx(false), String::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.md");
        output(&report, Some(&path)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_output_to_terminal() {
        let report = build(&sample_ctx(true), "p".to_string());
        // Should not panic
        output(&report, None).unwrap();
    }
}
