use tracing::debug;

use super::{split_diff, DiffError};
use crate::budget::{estimate_tokens, TokenBudget, TokenCounter};

/// The part of a pull request diff that fit the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedDiff {
    /// Surviving per-file diffs concatenated in original file order
    pub text: String,
    /// Exact tokens charged to the budget
    pub tokens: usize,
    /// Paths included, in original order
    pub included: Vec<String>,
    /// Paths left out, in original order
    pub omitted: Vec<String>,
}

/// Fit as many files of `raw_diff` as possible under the budget.
///
/// Phase one admits files smallest-estimate-first while the running estimate
/// (`chars / 3.5`) stays within the limit; a file that would overflow is
/// skipped. Phase two counts the admitted files exactly and evicts from the
/// end of the admission order until the exact total fits. The limit is
/// `budget.available()`, further capped by `sub_budget` when given.
///
/// Costs are taken on each line as it will appear in the prompt, with
/// `line_prefix` (tree indentation) in front of it.
///
/// Returns `Ok(None)` when nothing fits; the budget is only charged on success.
pub fn pack(
    raw_diff: &str,
    budget: &mut TokenBudget,
    counter: &dyn TokenCounter,
    sub_budget: Option<usize>,
    line_prefix: &str,
) -> Result<Option<PackedDiff>, DiffError> {
    let segments = split_diff(raw_diff)?;
    if segments.is_empty() {
        return Ok(None);
    }

    let limit = match sub_budget {
        Some(cap) => cap.min(budget.available()),
        None => budget.available(),
    };

    let rendered: Vec<String> = segments
        .iter()
        .map(|s| indent_lines(&s.text, line_prefix))
        .collect();

    let mut candidates = admit_by_estimate(&rendered, limit);
    if candidates.is_empty() {
        debug!(files = segments.len(), limit, "no diff file fits the estimate");
        return Ok(None);
    }

    let mut exact: Vec<usize> = candidates
        .iter()
        .map(|&i| counter.count(&rendered[i]))
        .collect();
    let mut total: usize = exact.iter().sum();
    while total > limit {
        let Some(evicted) = candidates.pop() else {
            break;
        };
        let cost = exact.pop().unwrap_or_default();
        total -= cost;
        let segment = &segments[evicted];
        debug!(
            path = %segment.path,
            tokens = cost,
            new = segment.is_new,
            deleted = segment.is_deleted,
            "evicted diff file after exact count"
        );
    }
    if candidates.is_empty() {
        debug!(files = segments.len(), limit, "no diff file fits the exact count");
        return Ok(None);
    }

    candidates.sort_unstable();
    let mut included = Vec::with_capacity(candidates.len());
    let mut omitted = Vec::new();
    let mut text = String::new();
    let mut next = candidates.iter().peekable();
    for (i, segment) in segments.iter().enumerate() {
        if next.peek() == Some(&&i) {
            next.next();
            text.push_str(&segment.text);
            included.push(segment.path.clone());
        } else {
            omitted.push(segment.path.clone());
        }
    }

    budget.charge(total);
    let (additions, deletions) = candidates.iter().fold((0, 0), |(a, d), &i| {
        (a + segments[i].additions, d + segments[i].deletions)
    });
    debug!(
        included = included.len(),
        omitted = omitted.len(),
        additions,
        deletions,
        tokens = total,
        "packed diff"
    );

    Ok(Some(PackedDiff {
        text,
        tokens: total,
        included,
        omitted,
    }))
}

/// Indices of admitted segments in admission (ascending estimate) order.
fn admit_by_estimate(rendered: &[String], limit: usize) -> Vec<usize> {
    let mut by_estimate: Vec<(usize, usize)> = rendered
        .iter()
        .enumerate()
        .map(|(i, text)| (i, estimate_tokens(text)))
        .collect();
    by_estimate.sort_by_key(|&(i, estimate)| (estimate, i));

    let mut running = 0usize;
    let mut admitted = Vec::new();
    for (i, estimate) in by_estimate {
        if running + estimate > limit {
            continue;
        }
        running += estimate;
        admitted.push(i);
    }
    admitted
}

/// `text` with `prefix` in front of every line, trailing whitespace trimmed
/// the way the renderer writes it.
fn indent_lines(text: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + prefix.len() * text.lines().count());
    for line in text.lines() {
        out.push_str(format!("{prefix}{line}").trim_end());
        out.push('\n');
    }
    out
}
