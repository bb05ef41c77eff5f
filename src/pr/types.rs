use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a pull request as delivered by one webhook event.
/// Built by webhook normalization from the GitHub payload, never deserialized directly.
#[derive(Debug, Clone)]
pub struct PullRequestData {
    /// Repository full name (e.g., "org/repo")
    pub repo_full_name: String,
    /// PR number (e.g., 42)
    pub number: u64,
    /// Head commit hash, used as the intent cache key
    pub head_sha: String,
    /// Author's GitHub login
    pub author: String,
    pub state: PrState,
    pub is_draft: bool,
    pub title: String,
    pub body: Option<String>,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub files: Vec<FileChange>,
    /// Logical monorepo packages touched by `files`; empty outside monorepo mode
    pub packages_touched: Vec<String>,
}

impl PullRequestData {
    /// Changed file paths, in payload order.
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Text embedded for Stage 1: title and body joined by a space.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.body.as_deref().unwrap_or(""))
    }

    /// At most `max_chars` characters of the body.
    pub fn body_snippet(&self, max_chars: usize) -> String {
        self.body
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(max_chars)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl PrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
            PrState::Merged => "merged",
        }
    }
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single file touched by the PR.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    /// File path (e.g., "src/auth/config.rs")
    pub path: String,
    pub kind: ChangeKind,
    /// Path before a rename
    pub previous_path: Option<String>,
    pub additions: u64,
    pub deletions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
    Renamed,
}

impl ChangeKind {
    /// Map a GitHub file `status`. Statuses without a dedicated kind
    /// ("changed", "copied", "unchanged") count as modifications.
    pub fn from_github(status: &str) -> Self {
        match status {
            "added" => ChangeKind::Added,
            "removed" | "deleted" => ChangeKind::Removed,
            "renamed" => ChangeKind::Renamed,
            _ => ChangeKind::Modified,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Removed => write!(f, "removed"),
            ChangeKind::Renamed => write!(f, "renamed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_pr;

    #[test]
    fn test_change_kind_from_github() {
        assert_eq!(ChangeKind::from_github("added"), ChangeKind::Added);
        assert_eq!(ChangeKind::from_github("removed"), ChangeKind::Removed);
        assert_eq!(ChangeKind::from_github("renamed"), ChangeKind::Renamed);
        assert_eq!(ChangeKind::from_github("copied"), ChangeKind::Modified);
    }

    #[test]
    fn test_embedding_text_without_body() {
        let mut pr = sample_pr(7, &["src/auth.rs"]);
        pr.title = "Fix login".to_string();
        pr.body = None;
        assert_eq!(pr.embedding_text(), "Fix login ");
    }

    #[test]
    fn test_body_snippet_respects_char_boundaries() {
        let mut pr = sample_pr(7, &[]);
        pr.body = Some("héllo wörld".to_string());
        assert_eq!(pr.body_snippet(4), "héll");
        assert_eq!(pr.body_snippet(100), "héllo wörld");
    }
}
