use chrono::{DateTime, Utc};

/// Final verdict shown to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Flagged as a duplicate of the given PR
    Duplicate(u64),
    Unique,
    /// The run ended before any comparison
    Skipped,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Duplicate(pr) => write!(f, "DUPLICATE of #{}", pr),
            Verdict::Unique => write!(f, "UNIQUE"),
            Verdict::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// One scored candidate in the report.
#[derive(Debug, Clone)]
pub struct MatchLine {
    pub pr_number: u64,
    pub confidence: f64,
    pub problem_similarity: f64,
    pub component_overlap: f64,
    pub behavioral_equivalence: f64,
    pub justification: String,
    /// Jaccard score of the two changed-file sets
    pub file_overlap: f64,
    /// Files changed by both PRs
    pub matched_files: Vec<String>,
}

/// Everything printed for one analysis run.
#[derive(Debug)]
pub struct Report {
    pub repo_full_name: String,
    pub pr_number: u64,
    pub pr_title: String,
    pub author: String,
    pub draft: bool,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub files_changed: usize,
    /// Lines added across all files
    pub additions: u64,
    /// Lines deleted across all files
    pub deletions: u64,
    /// One-line description of how the run ended
    pub summary: String,
    pub verdict: Verdict,
    /// Stage 5 threshold, when the run got that far
    pub threshold: Option<f64>,
    /// Semantic matches, most confident first
    pub matches: Vec<MatchLine>,
}
