use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::reference::DEFAULT_PLACEHOLDER_MARKERS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration loaded from .issue-context.toml.
/// Every section is optional; the tool works with zero config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub traversal: TraversalConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub references: ReferencesConfig,

    #[serde(default)]
    pub similarity: SimilarityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// REST root; point at `https://{host}/api/v3` for GitHub Enterprise
    pub api_base_url: String,
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: "https://api.github.com".to_string(),
            user_agent: "issue-context".to_string(),
        }
    }
}

impl GitHubConfig {
    /// Config file value takes precedence, then GITHUB_TOKEN.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Deepest reference hop followed from a root (root = 0)
    pub max_depth: usize,
    /// Simultaneous child resolutions per fan-out
    pub concurrency_limit: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            concurrency_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub model_max_token_limit: usize,
    pub max_completion_tokens: usize,
    /// `cl100k_base`, `o200k_base` or `heuristic`
    pub encoding: String,
    /// Per pull request cap on packed diff tokens
    pub diff_token_limit: Option<usize>,
    /// Fraction of the remaining budget one pull request's diff may take,
    /// leaving the rest for other nodes
    pub diff_budget_share: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            model_max_token_limit: 128_000,
            max_completion_tokens: 4_096,
            encoding: "cl100k_base".to_string(),
            diff_token_limit: None,
            diff_budget_share: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferencesConfig {
    /// Issue numbers used as examples in issue/PR templates ("Fixes #1234").
    /// Local references to these numbers are ignored in template text.
    pub placeholder_numbers: Vec<u64>,
    /// Phrases that mark a body or comment as template text (case-insensitive)
    pub placeholder_markers: Vec<String>,
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self {
            placeholder_numbers: vec![1234],
            placeholder_markers: DEFAULT_PLACEHOLDER_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Seeds scoring below this are dropped
    pub min_score: f32,
    /// At most this many seeds are resolved
    pub max_seeds: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_seeds: 5,
        }
    }
}

impl Config {
    /// Load configuration from .issue-context.toml in the current directory.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(".issue-context.toml");
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Config::default()
        };

        if config.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                config.github.token = Some(token);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.max_completion_tokens >= self.budget.model_max_token_limit {
            return Err(ConfigError::Invalid(format!(
                "budget.max_completion_tokens ({}) must be below budget.model_max_token_limit ({})",
                self.budget.max_completion_tokens, self.budget.model_max_token_limit
            )));
        }
        let share = self.budget.diff_budget_share;
        if !(share > 0.0 && share <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "budget.diff_budget_share ({share}) must be in (0, 1]"
            )));
        }
        if self.traversal.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "traversal.concurrency_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
