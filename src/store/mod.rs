pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feedback::{FeedbackKind, FeedbackStats};
use crate::pr::{PrState, PullRequestIntent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Database connection lock poisoned")]
    Poisoned,

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Embedding and metadata persisted for one PR, replaced on every analysis.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub repo_full_name: String,
    pub pr_number: u64,
    pub head_sha: String,
    pub title: String,
    pub description_snippet: String,
    pub author: String,
    pub state: PrState,
    /// Model that produced `embedding`
    pub embedding_model: String,
    pub embedding: Vec<f32>,
    pub files_changed: Vec<String>,
}

/// A stored PR ranked against a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPr {
    pub pr_number: u64,
    pub score: f64,
}

/// Append-only human feedback on a PR.
#[derive(Debug, Clone)]
pub struct FeedbackEvent {
    pub repo_full_name: String,
    pub pr_number: u64,
    pub user_id: String,
    pub kind: FeedbackKind,
    pub comment_id: Option<i64>,
    pub decision_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    CommentDuplicate,
    NoAction,
    /// The run ended before the decision stage.
    Skipped,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::CommentDuplicate => "comment_duplicate",
            DecisionAction::NoAction => "no_action",
            DecisionAction::Skipped => "skipped",
        }
    }
}

/// Terminal outcome of one completed pipeline run.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub repo_full_name: String,
    pub pr_number: u64,
    pub head_sha: String,
    pub action: DecisionAction,
    pub duplicate_of: Option<u64>,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the record for (repo, PR number).
    async fn upsert(&self, record: EmbeddingRecord) -> Result<(), StoreError>;

    /// Other PRs in `repo` embedded by `embedding_model` whose cosine
    /// similarity to `embedding` is at least `min_score`, best first, at most
    /// `limit` of them.
    async fn query_nearest(
        &self,
        repo: &str,
        exclude_pr: u64,
        embedding_model: &str,
        embedding: &[f32],
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<ScoredPr>, StoreError>;

    /// Changed-file list stored with a PR's embedding, if it was ever synced.
    async fn changed_files(&self, repo: &str, pr_number: u64)
        -> Result<Option<Vec<String>>, StoreError>;
}

#[async_trait]
pub trait IntentCache: Send + Sync {
    async fn get(
        &self,
        repo: &str,
        pr_number: u64,
        head_sha: &str,
    ) -> Result<Option<PullRequestIntent>, StoreError>;

    /// Most recently cached intent for a PR, whatever its head commit.
    async fn latest(&self, repo: &str, pr_number: u64)
        -> Result<Option<PullRequestIntent>, StoreError>;

    /// Insert or overwrite the intent for (repo, PR number, head commit).
    async fn put(
        &self,
        repo: &str,
        pr_number: u64,
        head_sha: &str,
        intent: &PullRequestIntent,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn append(&self, event: FeedbackEvent) -> Result<(), StoreError>;

    async fn aggregate(&self, repo: &str) -> Result<FeedbackStats, StoreError>;
}

#[async_trait]
pub trait DecisionLog: Send + Sync {
    /// Persist a decision and return its id.
    async fn record(&self, decision: DecisionRecord) -> Result<i64, StoreError>;

    /// Id of the newest decision for (repo, PR number).
    async fn latest_for(&self, repo: &str, pr_number: u64) -> Result<Option<i64>, StoreError>;
}

/// Cosine similarity of two vectors; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
