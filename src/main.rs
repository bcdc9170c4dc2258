mod budget;
mod config;
mod context;
mod diff;
mod graph;
mod prompt;
mod reference;
mod render;
mod report;
mod source;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use context::{ContextBuilder, ContextError, SimilarIssue};
use reference::Identifier;
use source::{FixtureSource, GitHubSource, IssueSource};

/// Issue Context: CLI tool that takes a GitHub issue or pull request and
/// assembles the linked-issue context for a question, packed to fit a model's
/// token budget.
#[derive(Parser, Debug)]
#[command(name = "issue-context", version, about)]
struct Cli {
    /// Issue or pull request: URL, owner/repo#123 or owner/repo/123
    ///
    /// Not required when --mock is used.
    reference: Option<String>,

    /// Question the context is assembled for
    #[arg(short, long, default_value = "Summarize the linked context.")]
    question: String,

    /// Known fact to state ahead of the context (repeatable)
    #[arg(long = "ground-truth")]
    ground_truth: Vec<String>,

    /// Similar issue to add as an extra root, as owner/repo/123=SCORE (repeatable)
    #[arg(long)]
    similar: Vec<SimilarIssue>,

    /// Override traversal.max_depth
    #[arg(long)]
    max_depth: Option<usize>,

    /// Override traversal.concurrency_limit
    #[arg(long)]
    concurrency: Option<usize>,

    /// Optional output file path for markdown report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use a built-in mock issue graph for demo purposes (no GitHub token needed)
    #[arg(long)]
    r#mock: bool,

    /// Read issues from a JSON fixture file instead of GitHub
    #[arg(long, conflicts_with = "mock")]
    fixture: Option<PathBuf>,
}

const MOCK_ROOT: &str = "acme/widgets/42";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let reference = match (cli.reference.as_deref(), cli.r#mock) {
        (Some(reference), _) => reference,
        (None, true) => MOCK_ROOT,
        (None, false) => {
            return Err("An issue reference is required unless --mock is used. \
                Usage: issue-context <REFERENCE> --question <TEXT> or issue-context --mock"
                .into())
        }
    };
    let main_span = info_span!("issue_context", reference = %reference);

    async {
        info!("parsing reference");
        let root = Identifier::parse(reference)?;
        debug!(owner = %root.owner, repo = %root.repo, number = root.number, "parsed reference");

        info!("loading configuration");
        let mut config = config::Config::load()?;
        if let Some(depth) = cli.max_depth {
            config.traversal.max_depth = depth;
        }
        if let Some(limit) = cli.concurrency {
            config.traversal.concurrency_limit = limit;
        }
        config.validate()?;

        let counter = budget::counter_for(&config.budget.encoding)?;
        let source: Arc<dyn IssueSource> = if cli.r#mock {
            info!("using mock issue graph for demo");
            Arc::new(FixtureSource::from_json(include_str!(
                "../tests/fixtures/mock_graph.json"
            ))?)
        } else if let Some(path) = &cli.fixture {
            info!(path = %path.display(), "reading issues from fixture file");
            Arc::new(FixtureSource::load_from(path)?)
        } else {
            Arc::new(GitHubSource::new(&config.github)?)
        };

        let preamble = prompt::preamble(&cli.question, &cli.ground_truth, &cli.similar);

        info!("assembling context");
        let builder = ContextBuilder::new(source, counter, config);
        let assembled = match builder.build(&root, &preamble, cli.similar.clone()).await {
            Ok(assembled) => assembled,
            Err(ContextError::NoContext(key)) => {
                eprintln!("Sorry, no context could be assembled: {key} could not be fetched.");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            nodes = assembled.graph.len(),
            seeds = assembled.seeds.len(),
            budget = %assembled.budget,
            "context assembled"
        );

        info!("generating report");
        let text = prompt::assemble(&preamble, &assembled.rendered);
        let built_report = report::build(&assembled, text);
        report::output(&built_report, cli.output.as_deref())?;
        info!(status = %built_report.status, "done");

        Ok::<(), Box<dyn std::error::Error>>(())
    }
    .instrument(main_span)
    .await
}
