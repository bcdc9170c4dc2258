/// How much of the linked context made it into the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextStatus {
    /// Every reachable node fetched and rendered
    Complete,
    /// Rendered, but some nodes failed or some diff files were left out
    Partial,
    /// Rendering exceeded the budget and was replaced by a placeholder
    Omitted,
}

impl std::fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextStatus::Complete => write!(f, "COMPLETE"),
            ContextStatus::Partial => write!(f, "PARTIAL"),
            ContextStatus::Omitted => write!(f, "OMITTED"),
        }
    }
}

/// Summary of one assembled context plus the prompt text.
#[derive(Debug)]
pub struct Report {
    /// Canonical key of the requested root
    pub root: String,
    /// Root title, empty when unknown
    pub title: String,
    /// Nodes in the graph, seeds included
    pub nodes: usize,
    /// Keys that could not be fetched
    pub failed: Vec<String>,
    /// Similarity seeds rendered as extra roots
    pub seeds: usize,
    /// Diff files dropped to fit the budget, across all pull requests
    pub omitted_diff_files: usize,
    /// Prompt tokens charged
    pub tokens_used: usize,
    /// Tokens left before the completion reserve
    pub tokens_remaining: i64,
    pub model_max_token_limit: usize,
    /// Tokens held back for the model's answer
    pub completion_reserve: usize,
    pub status: ContextStatus,
    /// Full prompt text
    pub prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(ContextStatus::Complete < ContextStatus::Partial);
        assert!(ContextStatus::Partial < ContextStatus::Omitted);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ContextStatus::Complete.to_string(), "COMPLETE");
        assert_eq!(ContextStatus::Partial.to_string(), "PARTIAL");
        assert_eq!(ContextStatus::Omitted.to_string(), "OMITTED");
    }
}
