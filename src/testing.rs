//! Shared fixtures and test doubles for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::llm::{LlmError, LlmGateway};
use crate::pr::intent::{ChangeMagnitude, ChangeType, KeyChanges};
use crate::pr::{ChangeKind, FileChange, PrState, PullRequestData, PullRequestIntent};

/// Minimal open PR in "org/repo" touching `files`.
pub fn sample_pr(number: u64, files: &[&str]) -> PullRequestData {
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    PullRequestData {
        repo_full_name: "org/repo".to_string(),
        number,
        head_sha: format!("sha-{}", number),
        author: "alice".to_string(),
        state: PrState::Open,
        is_draft: false,
        title: "Fix login bug".to_string(),
        body: Some("Users cannot log in when the password has special characters".to_string()),
        labels: Vec::new(),
        created_at: created,
        updated_at: created,
        files: files
            .iter()
            .map(|path| FileChange {
                path: path.to_string(),
                kind: ChangeKind::Modified,
                previous_path: None,
                additions: 3,
                deletions: 1,
            })
            .collect(),
        packages_touched: Vec::new(),
    }
}

pub fn sample_intent(problem: &str) -> PullRequestIntent {
    PullRequestIntent {
        problem_being_solved: problem.to_string(),
        affected_component: "Auth".to_string(),
        behavioral_change: "Special characters are accepted".to_string(),
        change_type: ChangeType::Bugfix,
        change_magnitude: ChangeMagnitude::Minor,
        key_changes: KeyChanges {
            files: vec!["src/auth.rs".to_string()],
            functions: Vec::new(),
        },
    }
}

/// Scripted [`LlmGateway`] that counts calls and records prompts.
///
/// `embed` returns the configured vector (or fails when none is set);
/// `generate_structured` pops queued responses and fails once the queue is empty.
pub struct StubGateway {
    embedding: Option<Vec<f32>>,
    responses: Mutex<VecDeque<Result<serde_json::Value, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    embed_calls: AtomicUsize,
    generate_calls: AtomicUsize,
}

impl StubGateway {
    pub fn with_embedding(embedding: Vec<f32>) -> Self {
        Self {
            embedding: Some(embedding),
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            embed_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_embed() -> Self {
        Self {
            embedding: None,
            ..Self::with_embedding(Vec::new())
        }
    }

    pub fn push_response(&self, response: Result<serde_json::Value, LlmError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmGateway for StubGateway {
    fn embedding_model(&self) -> &str {
        "stub-embedding"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.embedding.clone().ok_or(LlmError::Api {
            status: 503,
            message: "embedding backend unavailable".to_string(),
        })
    }

    async fn generate_structured(&self, prompt: &str) -> Result<serde_json::Value, LlmError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}
