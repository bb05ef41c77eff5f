use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use super::{
    cosine_similarity, DecisionLog, DecisionRecord, EmbeddingRecord, FeedbackEvent, FeedbackStore,
    IntentCache, ScoredPr, StoreError, VectorStore,
};
use crate::feedback::FeedbackStats;
use crate::pr::PullRequestIntent;

/// SQLite-backed implementation of every store the pipeline needs.
///
/// One connection is shared behind a mutex; each call runs on the blocking
/// thread pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }

    /// All feedback events for a repository, oldest first.
    #[cfg(test)]
    pub async fn feedback_events(&self, repo: &str) -> Result<Vec<FeedbackEvent>, StoreError> {
        let repo = repo.to_string();
        self.call(move |conn| {
            let mut statement = conn.prepare(
                "
                SELECT repo_full_name, pr_number, user_id, feedback_type, comment_id, decision_id, created_at
                FROM feedback_events
                WHERE repo_full_name = ?1
                ORDER BY id ASC
                ",
            )?;
            let mut rows = statement.query(params![repo])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let kind: String = row.get(3)?;
                out.push(FeedbackEvent {
                    repo_full_name: row.get(0)?,
                    pr_number: row.get::<_, i64>(1)? as u64,
                    user_id: row.get(2)?,
                    kind: crate::feedback::FeedbackKind::parse(&kind)
                        .ok_or_else(|| StoreError::InvalidValue(kind.clone()))?,
                    comment_id: row.get(4)?,
                    decision_id: row.get(5)?,
                    created_at: row.get(6)?,
                });
            }
            Ok(out)
        })
        .await
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pr_embeddings (
          repo_full_name TEXT NOT NULL,
          pr_number INTEGER NOT NULL,
          head_sha TEXT NOT NULL,
          title TEXT NOT NULL,
          description_snippet TEXT NOT NULL,
          author TEXT NOT NULL,
          state TEXT NOT NULL,
          embedding_model TEXT NOT NULL,
          embedding BLOB NOT NULL,
          files_changed TEXT NOT NULL,
          last_activity_at TEXT NOT NULL,
          PRIMARY KEY (repo_full_name, pr_number)
        );

        CREATE TABLE IF NOT EXISTS pr_intents (
          repo_full_name TEXT NOT NULL,
          pr_number INTEGER NOT NULL,
          head_sha TEXT NOT NULL,
          intent TEXT NOT NULL,
          created_at TEXT NOT NULL,
          PRIMARY KEY (repo_full_name, pr_number, head_sha)
        );

        CREATE TABLE IF NOT EXISTS feedback_events (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          repo_full_name TEXT NOT NULL,
          pr_number INTEGER NOT NULL,
          user_id TEXT NOT NULL,
          feedback_type TEXT NOT NULL CHECK (feedback_type IN ('positive', 'negative')),
          comment_id INTEGER,
          decision_id INTEGER,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_feedback_repo ON feedback_events(repo_full_name);

        CREATE TABLE IF NOT EXISTS analysis_decisions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          repo_full_name TEXT NOT NULL,
          source_pr INTEGER NOT NULL,
          head_sha TEXT NOT NULL,
          action TEXT NOT NULL,
          duplicate_of INTEGER,
          confidence REAL,
          reason TEXT,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_decisions_pr ON analysis_decisions(repo_full_name, source_pr);
        ",
    )?;
    Ok(())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidValue(format!(
            "embedding blob of {} bytes",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, record: EmbeddingRecord) -> Result<(), StoreError> {
        self.call(move |conn| {
            let files_json = serde_json::to_string(&record.files_changed)?;
            conn.execute(
                "
                INSERT INTO pr_embeddings(
                  repo_full_name, pr_number, head_sha, title, description_snippet,
                  author, state, embedding_model, embedding, files_changed, last_activity_at
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(repo_full_name, pr_number) DO UPDATE SET
                  head_sha=excluded.head_sha,
                  title=excluded.title,
                  description_snippet=excluded.description_snippet,
                  author=excluded.author,
                  state=excluded.state,
                  embedding_model=excluded.embedding_model,
                  embedding=excluded.embedding,
                  files_changed=excluded.files_changed,
                  last_activity_at=excluded.last_activity_at
                ",
                params![
                    record.repo_full_name,
                    record.pr_number as i64,
                    record.head_sha,
                    record.title,
                    record.description_snippet,
                    record.author,
                    record.state.as_str(),
                    record.embedding_model,
                    encode_embedding(&record.embedding),
                    files_json,
                    Utc::now(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn query_nearest(
        &self,
        repo: &str,
        exclude_pr: u64,
        embedding_model: &str,
        embedding: &[f32],
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<ScoredPr>, StoreError> {
        let repo = repo.to_string();
        let model = embedding_model.to_string();
        let query = embedding.to_vec();
        let mut scored = self
            .call(move |conn| {
                let mut statement = conn.prepare(
                    "
                    SELECT pr_number, embedding
                    FROM pr_embeddings
                    WHERE repo_full_name = ?1 AND pr_number != ?2 AND embedding_model = ?3
                    ",
                )?;
                let mut rows = statement.query(params![repo, exclude_pr as i64, model])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let pr_number = row.get::<_, i64>(0)? as u64;
                    let blob: Vec<u8> = row.get(1)?;
                    let score = cosine_similarity(&query, &decode_embedding(&blob)?);
                    if score >= min_score {
                        out.push(ScoredPr { pr_number, score });
                    }
                }
                Ok(out)
            })
            .await?;

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.pr_number.cmp(&b.pr_number))
        });
        scored.truncate(limit);
        debug!(hits = scored.len(), "nearest-neighbour query");
        Ok(scored)
    }

    async fn changed_files(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<Vec<String>>, StoreError> {
        let repo = repo.to_string();
        self.call(move |conn| {
            let files: Option<String> = conn
                .query_row(
                    "
                    SELECT files_changed
                    FROM pr_embeddings
                    WHERE repo_full_name = ?1 AND pr_number = ?2
                    ",
                    params![repo, pr_number as i64],
                    |row| row.get(0),
                )
                .optional()?;
            files
                .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
                .transpose()
        })
        .await
    }
}

#[async_trait]
impl IntentCache for SqliteStore {
    async fn get(
        &self,
        repo: &str,
        pr_number: u64,
        head_sha: &str,
    ) -> Result<Option<PullRequestIntent>, StoreError> {
        let repo = repo.to_string();
        let head_sha = head_sha.to_string();
        self.call(move |conn| {
            let intent: Option<String> = conn
                .query_row(
                    "
                    SELECT intent
                    FROM pr_intents
                    WHERE repo_full_name = ?1 AND pr_number = ?2 AND head_sha = ?3
                    ",
                    params![repo, pr_number as i64, head_sha],
                    |row| row.get(0),
                )
                .optional()?;
            intent
                .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn latest(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<PullRequestIntent>, StoreError> {
        let repo = repo.to_string();
        self.call(move |conn| {
            let intent: Option<String> = conn
                .query_row(
                    "
                    SELECT intent
                    FROM pr_intents
                    WHERE repo_full_name = ?1 AND pr_number = ?2
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT 1
                    ",
                    params![repo, pr_number as i64],
                    |row| row.get(0),
                )
                .optional()?;
            intent
                .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn put(
        &self,
        repo: &str,
        pr_number: u64,
        head_sha: &str,
        intent: &PullRequestIntent,
    ) -> Result<(), StoreError> {
        let repo = repo.to_string();
        let head_sha = head_sha.to_string();
        let intent_json = serde_json::to_string(intent)?;
        self.call(move |conn| {
            conn.execute(
                "
                INSERT INTO pr_intents(repo_full_name, pr_number, head_sha, intent, created_at)
                VALUES(?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(repo_full_name, pr_number, head_sha) DO UPDATE SET
                  intent=excluded.intent,
                  created_at=excluded.created_at
                ",
                params![repo, pr_number as i64, head_sha, intent_json, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl FeedbackStore for SqliteStore {
    async fn append(&self, event: FeedbackEvent) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "
                INSERT INTO feedback_events(
                  repo_full_name, pr_number, user_id, feedback_type, comment_id, decision_id, created_at
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    event.repo_full_name,
                    event.pr_number as i64,
                    event.user_id,
                    event.kind.as_str(),
                    event.comment_id,
                    event.decision_id,
                    event.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn aggregate(&self, repo: &str) -> Result<FeedbackStats, StoreError> {
        let repo = repo.to_string();
        self.call(move |conn| {
            let (positive, negative): (i64, i64) = conn.query_row(
                "
                SELECT
                  COALESCE(SUM(CASE WHEN feedback_type = 'positive' THEN 1 ELSE 0 END), 0),
                  COALESCE(SUM(CASE WHEN feedback_type = 'negative' THEN 1 ELSE 0 END), 0)
                FROM feedback_events
                WHERE repo_full_name = ?1
                ",
                params![repo],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(FeedbackStats {
                positive: positive as u64,
                negative: negative as u64,
            })
        })
        .await
    }
}

#[async_trait]
impl DecisionLog for SqliteStore {
    async fn record(&self, decision: DecisionRecord) -> Result<i64, StoreError> {
        self.call(move |conn| {
            conn.execute(
                "
                INSERT INTO analysis_decisions(
                  repo_full_name, source_pr, head_sha, action, duplicate_of, confidence, reason, created_at
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
                params![
                    decision.repo_full_name,
                    decision.pr_number as i64,
                    decision.head_sha,
                    decision.action.as_str(),
                    decision.duplicate_of.map(|n| n as i64),
                    decision.confidence,
                    decision.reason,
                    Utc::now(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn latest_for(&self, repo: &str, pr_number: u64) -> Result<Option<i64>, StoreError> {
        let repo = repo.to_string();
        self.call(move |conn| {
            let id = conn
                .query_row(
                    "
                    SELECT id
                    FROM analysis_decisions
                    WHERE repo_full_name = ?1 AND source_pr = ?2
                    ORDER BY id DESC
                    LIMIT 1
                    ",
                    params![repo, pr_number as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
        .await
    }
}
