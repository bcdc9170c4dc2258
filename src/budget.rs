use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tiktoken_rs::CoreBPE;

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("max_completion_tokens ({completion}) must be below model_max_token_limit ({limit})")]
    InvalidLimits { limit: usize, completion: usize },

    #[error("Unknown tokenizer encoding: {0}")]
    UnknownEncoding(String),

    #[error("Failed to load tokenizer: {0}")]
    Tokenizer(String),
}

/// Characters per token used by the cheap estimate.
const CHARS_PER_TOKEN: f64 = 3.5;

/// Cheap token estimate: `ceil(chars / 3.5)`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// Pluggable token counting strategy.
pub trait TokenCounter: Send + Sync {
    /// Count the tokens `text` occupies in the prompt.
    fn count(&self, text: &str) -> usize;
}

/// Counts with the `chars / 3.5` estimate. Deterministic and model-agnostic.
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Exact BPE counter backed by tiktoken.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> Result<Self, BudgetError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| BudgetError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }

    pub fn o200k() -> Result<Self, BudgetError> {
        let bpe = tiktoken_rs::o200k_base().map_err(|e| BudgetError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Build the counter named by the `budget.encoding` config value.
pub fn counter_for(encoding: &str) -> Result<Arc<dyn TokenCounter>, BudgetError> {
    match encoding {
        "cl100k_base" => Ok(Arc::new(TiktokenCounter::cl100k()?)),
        "o200k_base" => Ok(Arc::new(TiktokenCounter::o200k()?)),
        "heuristic" => Ok(Arc::new(HeuristicCounter)),
        other => Err(BudgetError::UnknownEncoding(other.to_string())),
    }
}

/// Ledger of prompt token capacity.
///
/// Invariant, re-established after every mutation:
/// `tokens_remaining == model_max_token_limit - max_completion_tokens - running_token_count`.
/// `tokens_remaining` is signed because [`TokenBudget::charge`] may overrun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBudget {
    model_max_token_limit: usize,
    max_completion_tokens: usize,
    running_token_count: usize,
    tokens_remaining: i64,
}

impl TokenBudget {
    pub fn new(model_max_token_limit: usize, max_completion_tokens: usize) -> Result<Self, BudgetError> {
        if max_completion_tokens >= model_max_token_limit {
            return Err(BudgetError::InvalidLimits {
                limit: model_max_token_limit,
                completion: max_completion_tokens,
            });
        }
        let mut budget = Self {
            model_max_token_limit,
            max_completion_tokens,
            running_token_count: 0,
            tokens_remaining: 0,
        };
        budget.recompute();
        Ok(budget)
    }

    pub fn model_max_token_limit(&self) -> usize {
        self.model_max_token_limit
    }

    pub fn max_completion_tokens(&self) -> usize {
        self.max_completion_tokens
    }

    pub fn running_token_count(&self) -> usize {
        self.running_token_count
    }

    pub fn tokens_remaining(&self) -> i64 {
        self.tokens_remaining
    }

    /// Remaining capacity clamped at zero.
    pub fn available(&self) -> usize {
        self.tokens_remaining.max(0) as usize
    }

    pub fn fits(&self, tokens: usize) -> bool {
        tokens <= self.available()
    }

    /// Consume `tokens` only if they fit. Leaves the ledger untouched otherwise.
    pub fn try_consume(&mut self, tokens: usize) -> bool {
        if !self.fits(tokens) {
            return false;
        }
        self.charge(tokens);
        true
    }

    /// Consume unconditionally, for text the caller must include regardless.
    pub fn charge(&mut self, tokens: usize) {
        self.running_token_count = self.running_token_count.saturating_add(tokens);
        self.recompute();
    }

    /// Give back tokens for content that was evicted.
    pub fn release(&mut self, tokens: usize) {
        self.running_token_count = self.running_token_count.saturating_sub(tokens);
        self.recompute();
    }

    fn recompute(&mut self) {
        self.tokens_remaining = self.model_max_token_limit as i64
            - self.max_completion_tokens as i64
            - self.running_token_count as i64;
    }
}

impl fmt::Display for TokenBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} used / {} remaining (limit {}, completion {})",
            self.running_token_count,
            self.tokens_remaining,
            self.model_max_token_limit,
            self.max_completion_tokens
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(budget: &TokenBudget) {
        assert_eq!(
            budget.tokens_remaining(),
            budget.model_max_token_limit() as i64
                - budget.max_completion_tokens() as i64
                - budget.running_token_count() as i64
        );
    }

    #[test]
    fn test_new_budget() {
        let budget = TokenBudget::new(1000, 200).unwrap();
        assert_eq!(budget.tokens_remaining(), 800);
        assert_eq!(budget.running_token_count(), 0);
        assert_invariant(&budget);
    }

    #[test]
    fn test_rejects_completion_above_limit() {
        assert!(matches!(
            TokenBudget::new(100, 100),
            Err(BudgetError::InvalidLimits { .. })
        ));
    }

    #[test]
    fn test_invariant_holds_across_mutations() {
        let mut budget = TokenBudget::new(1000, 200).unwrap();
        assert!(budget.try_consume(300));
        assert_invariant(&budget);
        assert!(!budget.try_consume(501));
        assert_eq!(budget.running_token_count(), 300);
        assert_invariant(&budget);
        budget.release(100);
        assert_eq!(budget.tokens_remaining(), 600);
        assert_invariant(&budget);
        budget.charge(700);
        assert_eq!(budget.tokens_remaining(), -100);
        assert_eq!(budget.available(), 0);
        assert_invariant(&budget);
        budget.release(10_000);
        assert_eq!(budget.running_token_count(), 0);
        assert_invariant(&budget);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(35)), 10);
        assert_eq!(estimate_tokens(&"x".repeat(36)), 11);
    }

    #[test]
    fn test_counter_for_unknown_encoding() {
        assert!(matches!(
            counter_for("p50k_nope"),
            Err(BudgetError::UnknownEncoding(_))
        ));
        assert_eq!(counter_for("heuristic").unwrap().count("abcdefg"), 2);
    }

    #[test]
    fn test_tiktoken_counter_counts_words() {
        let counter = TiktokenCounter::cl100k().unwrap();
        assert_eq!(counter.count(""), 0);
        assert!(counter.count("hello world") >= 2);
    }
}
