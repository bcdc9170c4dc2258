//! Prompt text placed around the rendered context.
//!
//! The preamble is built before traversal so its tokens can be charged to the
//! budget first; the rendered context is appended verbatim afterwards.

use crate::context::SimilarIssue;
use crate::render::RenderedContext;

/// Question, ground truth and similar-issue sections, ending with the heading
/// the context blocks go under.
pub fn preamble(question: &str, ground_truths: &[String], similar: &[SimilarIssue]) -> String {
    let mut out = String::new();
    out.push_str("## Question\n");
    out.push_str(question.trim());
    out.push_str("\n\n");

    if !ground_truths.is_empty() {
        out.push_str("## Ground truth\n");
        for fact in ground_truths {
            out.push_str(&format!("- {}\n", fact.trim()));
        }
        out.push('\n');
    }

    if !similar.is_empty() {
        out.push_str("## Similar issues\n");
        for seed in similar {
            let id = &seed.identifier;
            out.push_str(&format!(
                "- {}/{}#{} (similarity {:.2})\n",
                id.owner, id.repo, id.number, seed.score
            ));
        }
        out.push('\n');
    }

    out.push_str("## Linked issue context\n");
    out
}

/// Full prompt: preamble followed by the context blocks.
pub fn assemble(preamble: &str, rendered: &RenderedContext) -> String {
    let mut out = String::with_capacity(preamble.len() + rendered.blocks.iter().map(String::len).sum::<usize>());
    out.push_str(preamble);
    for block in &rendered.blocks {
        out.push_str(block);
    }
    out
}
