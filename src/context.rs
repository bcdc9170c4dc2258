use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::budget::{BudgetError, TokenBudget, TokenCounter};
use crate::config::Config;
use crate::graph::{ContextGraph, GraphFetcher, TraversalOptions};
use crate::reference::{Identifier, ReferenceError, ReferenceExtractor};
use crate::render::{self, RenderedContext};
use crate::source::IssueSource;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("No context available: {0} could not be resolved")]
    NoContext(String),

    #[error("Invalid token budget: {0}")]
    Budget(#[from] BudgetError),
}

/// A candidate from the similarity/rerank collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarIssue {
    pub identifier: Identifier,
    pub score: f32,
}

impl FromStr for SimilarIssue {
    type Err = ReferenceError;

    /// `owner/repo/123=0.82`; a missing score means 1.0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, score) = match s.rsplit_once('=') {
            Some((key, score)) => {
                let score = score
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| ReferenceError::Malformed(s.to_string()))?;
                (key, score)
            }
            None => (s, 1.0),
        };
        Ok(Self {
            identifier: Identifier::parse(key)?,
            score,
        })
    }
}

/// Everything one request produced.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub root: Identifier,
    pub graph: ContextGraph,
    pub rendered: RenderedContext,
    pub budget: TokenBudget,
    /// Seeds that passed the score filter, best first
    pub seeds: Vec<SimilarIssue>,
}

/// Builds the linked-issue context for one question.
///
/// Every call starts from a fresh budget and a fresh traversal; nothing is
/// cached between calls.
pub struct ContextBuilder {
    source: Arc<dyn IssueSource>,
    counter: Arc<dyn TokenCounter>,
    config: Config,
}

impl ContextBuilder {
    pub fn new(source: Arc<dyn IssueSource>, counter: Arc<dyn TokenCounter>, config: Config) -> Self {
        Self {
            source,
            counter,
            config,
        }
    }

    /// Resolve `root` and the similarity `seeds`, then render under the budget.
    ///
    /// `preamble` is prompt text the caller will place before the context
    /// (question, ground truth); it is charged before anything is fetched.
    /// Only an unresolvable root is an error.
    #[instrument(skip(self, preamble, seeds), fields(root = %root))]
    pub async fn build(
        &self,
        root: &Identifier,
        preamble: &str,
        seeds: Vec<SimilarIssue>,
    ) -> Result<AssembledContext, ContextError> {
        let budget_config = &self.config.budget;
        let mut budget = TokenBudget::new(
            budget_config.model_max_token_limit,
            budget_config.max_completion_tokens,
        )?;
        budget.charge(self.counter.count(preamble));

        let fetcher = GraphFetcher::new(
            self.source.clone(),
            self.counter.clone(),
            ReferenceExtractor::new(self.config.references.placeholder_numbers.iter().copied())
                .with_placeholder_markers(&self.config.references.placeholder_markers),
            budget,
            TraversalOptions {
                max_depth: self.config.traversal.max_depth,
                concurrency_limit: self.config.traversal.concurrency_limit,
                diff_token_limit: budget_config.diff_token_limit,
                diff_budget_share: budget_config.diff_budget_share,
            },
        );

        fetcher
            .resolve(root)
            .await
            .ok_or_else(|| ContextError::NoContext(root.key()))?;

        let seeds = self.select_seeds(root, seeds);
        if !seeds.is_empty() {
            let ids = seeds.iter().map(|s| s.identifier.clone()).collect();
            let resolved = fetcher.resolve_all(ids).await;
            info!(
                seeds = seeds.len(),
                resolved = resolved.iter().flatten().count(),
                "resolved similarity seeds"
            );
        }

        let (graph, mut budget) = fetcher.finish();
        let rendered = render::render(&graph, &mut budget, self.counter.as_ref());
        info!(
            nodes = graph.len(),
            failed = graph.failed().len(),
            tokens = budget.running_token_count(),
            exceeded = rendered.exceeded,
            "context assembled"
        );

        Ok(AssembledContext {
            root: root.clone(),
            graph,
            rendered,
            budget,
            seeds,
        })
    }

    /// Drop seeds below `min_score` or equal to the root, best first, capped
    /// at `max_seeds`.
    fn select_seeds(&self, root: &Identifier, mut seeds: Vec<SimilarIssue>) -> Vec<SimilarIssue> {
        let similarity = &self.config.similarity;
        seeds.retain(|s| s.score >= similarity.min_score && s.identifier != *root);
        seeds.sort_by(|a, b| b.score.total_cmp(&a.score));
        seeds.dedup_by(|a, b| a.identifier == b.identifier);
        seeds.truncate(similarity.max_seeds);
        seeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::HeuristicCounter;
    use crate::source::FixtureSource;

    fn id(key: &str) -> Identifier {
        Identifier::parse(key).unwrap()
    }

    fn builder(source: FixtureSource, config: Config) -> ContextBuilder {
        ContextBuilder::new(Arc::new(source), Arc::new(HeuristicCounter), config)
    }

    fn sample_source() -> FixtureSource {
        FixtureSource::new()
            .with_issue("acme/app/1", "Crash when saving. Related: #2")
            .with_comment("acme/app/1", "bob", "Still happens on main")
            .with_pull_request(
                "acme/app/2",
                "Fixes #1",
                "diff --git a/src/save.rs b/src/save.rs\n@@ -1 +1 @@\n-panic!()\n+Ok(())\n",
            )
            .with_issue("acme/app/7", "Saving is slow")
    }

    #[tokio::test]
    async fn test_build_renders_graph() {
        let builder = builder(sample_source(), Config::default());
        let ctx = builder.build(&id("acme/app/1"), "", Vec::new()).await.unwrap();

        assert_eq!(ctx.graph.len(), 2);
        assert!(!ctx.rendered.exceeded);
        let text = ctx.rendered.text();
        assert!(text.contains("Issue acme/app#1"));
        assert!(text.contains("Pull Request acme/app#2"));
        assert!(text.contains("+Ok(())"));
        assert_eq!(ctx.budget.running_token_count(), ctx.rendered.tokens);
    }

    #[tokio::test]
    async fn test_preamble_is_charged() {
        let builder = builder(sample_source(), Config::default());
        let preamble = "## Question\nWhy does saving crash?\n";
        let ctx = builder.build(&id("acme/app/1"), preamble, Vec::new()).await.unwrap();
        assert_eq!(
            ctx.budget.running_token_count(),
            ctx.rendered.tokens + HeuristicCounter.count(preamble)
        );
    }

    #[tokio::test]
    async fn test_unresolvable_root_is_no_context() {
        let builder = builder(sample_source(), Config::default());
        let err = builder.build(&id("acme/app/404"), "", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ContextError::NoContext(key) if key == "acme/app/404"));
    }

    #[tokio::test]
    async fn test_seeds_filtered_and_resolved() {
        let mut config = Config::default();
        config.similarity.min_score = 0.5;
        config.similarity.max_seeds = 1;
        let builder = builder(sample_source(), config);
        let seeds = vec![
            "acme/app/7=0.9".parse().unwrap(),
            "acme/app/8=0.8".parse().unwrap(),
            "acme/app/1=0.99".parse().unwrap(),
            "acme/app/3=0.1".parse().unwrap(),
        ];
        let ctx = builder.build(&id("acme/app/1"), "", seeds).await.unwrap();

        assert_eq!(ctx.seeds.len(), 1);
        assert_eq!(ctx.seeds[0].identifier, id("acme/app/7"));
        assert_eq!(ctx.graph.roots(), ["acme/app/1".to_string(), "acme/app/7".to_string()]);
        assert!(ctx.rendered.text().contains("(similar)"));
    }

    #[tokio::test]
    async fn test_tiny_budget_yields_placeholder() {
        let mut config = Config::default();
        config.budget.model_max_token_limit = 120;
        config.budget.max_completion_tokens = 100;
        let builder = builder(sample_source(), config);
        let ctx = builder.build(&id("acme/app/1"), "", Vec::new()).await.unwrap();
        assert!(ctx.rendered.exceeded);
        assert_eq!(ctx.rendered.blocks.len(), 1);
    }

    #[test]
    fn test_similar_issue_parse() {
        let seed: SimilarIssue = "acme/app/3=0.25".parse().unwrap();
        assert_eq!(seed.identifier, id("acme/app/3"));
        assert!((seed.score - 0.25).abs() < f32::EPSILON);

        let bare: SimilarIssue = "acme/app#3".parse().unwrap();
        assert!((bare.score - 1.0).abs() < f32::EPSILON);
        assert!("acme/app/3=high".parse::<SimilarIssue>().is_err());
    }

    #[tokio::test]
    async fn test_bundled_mock_graph() {
        let source = FixtureSource::from_json(include_str!("../tests/fixtures/mock_graph.json")).unwrap();
        let builder = builder(source, Config::default());
        let seeds = vec!["acme/widgets/51=0.7".parse().unwrap()];
        let ctx = builder.build(&id("acme/widgets/42"), "", seeds).await.unwrap();

        let mut keys: Vec<String> = ctx.graph.nodes().map(|n| n.key()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["acme/gadgets/7", "acme/widgets/42", "acme/widgets/43", "acme/widgets/44", "acme/widgets/51"]
        );
        assert!(ctx.graph.failed().is_empty());
        assert!(ctx.graph.get("acme/widgets/1234").is_none());

        let text = ctx.rendered.text();
        assert!(text.contains("Pull Request acme/widgets#43"));
        assert!(text.contains("+    validate::check(widget)?;"));
        assert!(text.contains("Can we keep the old error message"));
        assert!(text.contains("(similar)"));
        assert_eq!(text.matches("Issue acme/widgets#42:").count(), 1);
    }

    #[tokio::test]
    async fn test_large_diff_leaves_room_for_other_nodes() {
        let mut diff = String::new();
        for f in 0..20 {
            diff.push_str(&format!(
                "diff --git a/src/file{f}.rs b/src/file{f}.rs\n@@ -1,40 +1,40 @@\n"
            ));
            for i in 0..40 {
                diff.push_str(&format!("+    let value_{i} = compute({i});\n"));
            }
        }
        let source = FixtureSource::new()
            .with_issue("acme/app/1", "Crash on save, fixed by #2")
            .with_pull_request("acme/app/2", "Fixes #1", &diff);
        let mut config = Config::default();
        config.budget.model_max_token_limit = 4_000;
        config.budget.max_completion_tokens = 500;
        assert!(HeuristicCounter.count(&diff) > 3_500);

        let ctx = builder(source, config)
            .build(&id("acme/app/1"), "", Vec::new())
            .await
            .unwrap();

        assert!(!ctx.rendered.exceeded);
        let text = ctx.rendered.text();
        assert!(text.contains("Crash on save, fixed by #2"));
        assert!(text.contains("Pull Request acme/app#2"));
        let pr = ctx.graph.get("acme/app/2").unwrap();
        let packed = pr.pull_request.as_ref().unwrap().diff.as_ref().unwrap();
        assert!(!packed.included.is_empty());
        assert!(!packed.omitted.is_empty());
        assert_eq!(ctx.budget.running_token_count(), ctx.rendered.tokens);
    }
}
