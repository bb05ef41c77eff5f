pub mod comparison;
pub mod decision;
pub mod embeddings;
pub mod file_overlap;
pub mod intent;
pub mod quick_exit;

pub use comparison::SemanticMatch;
pub use decision::Decision;
pub use quick_exit::ExitReason;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::config::RepoConfig;
use crate::llm::{LlmError, LlmGateway, OfflineGateway};
use crate::pr::PullRequestData;
use crate::store::{
    DecisionAction, DecisionLog, DecisionRecord, FeedbackStore, IntentCache, SqliteStore,
    StoreError, VectorStore,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("LLM gateway failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Immutable inputs shared by every stage of one run.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub pr: &'a PullRequestData,
    pub config: &'a RepoConfig,
}

/// How a completed run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// The repository has analysis turned off.
    Disabled,
    QuickExit(ExitReason),
    /// No stored PR was similar enough to the description.
    NoCandidates,
    /// Similar PRs existed but none shared enough files.
    NoCheapMatches { candidates: usize },
    Decided {
        decision: Decision,
        threshold: f64,
        matches: Vec<SemanticMatch>,
    },
}

impl AnalysisOutcome {
    pub fn action(&self) -> DecisionAction {
        match self {
            AnalysisOutcome::Disabled | AnalysisOutcome::QuickExit(_) => DecisionAction::Skipped,
            AnalysisOutcome::NoCandidates | AnalysisOutcome::NoCheapMatches { .. } => {
                DecisionAction::NoAction
            }
            AnalysisOutcome::Decided { decision, .. } => decision.action(),
        }
    }

    fn reason(&self) -> Option<String> {
        match self {
            AnalysisOutcome::Disabled => Some("repo_disabled".to_string()),
            AnalysisOutcome::QuickExit(reason) => Some(reason.to_string()),
            AnalysisOutcome::NoCandidates => Some("no_candidates".to_string()),
            AnalysisOutcome::NoCheapMatches { .. } => Some("no_cheap_matches".to_string()),
            AnalysisOutcome::Decided {
                decision: Decision::CommentDuplicate { justification, .. },
                ..
            } => Some(justification.clone()),
            AnalysisOutcome::Decided { .. } => None,
        }
    }

    fn to_record(&self, pr: &PullRequestData) -> DecisionRecord {
        let (duplicate_of, confidence) = match self {
            AnalysisOutcome::Decided {
                decision:
                    Decision::CommentDuplicate {
                        pr_number,
                        confidence,
                        ..
                    },
                ..
            } => (Some(*pr_number), Some(*confidence)),
            AnalysisOutcome::Decided { matches, .. } => (
                None,
                matches
                    .iter()
                    .map(|m| m.final_confidence)
                    .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.max(c)))),
            ),
            _ => (None, None),
        };
        DecisionRecord {
            repo_full_name: pr.repo_full_name.clone(),
            pr_number: pr.number,
            head_sha: pr.head_sha.clone(),
            action: self.action(),
            duplicate_of,
            confidence,
            reason: self.reason(),
        }
    }
}

impl std::fmt::Display for AnalysisOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisOutcome::Disabled => write!(f, "skipped (repository disabled)"),
            AnalysisOutcome::QuickExit(reason) => write!(f, "skipped ({})", reason),
            AnalysisOutcome::NoCandidates => write!(f, "no_action (no similar PRs)"),
            AnalysisOutcome::NoCheapMatches { candidates } => {
                write!(f, "no_action ({} similar PRs, no file overlap)", candidates)
            }
            AnalysisOutcome::Decided { decision, .. } => write!(f, "{}", decision),
        }
    }
}

/// Runs the six-stage duplicate analysis. Every collaborator is injected.
#[derive(Clone)]
pub struct Pipeline {
    llm: Arc<dyn LlmGateway>,
    offline: Arc<dyn LlmGateway>,
    vectors: Arc<dyn VectorStore>,
    intents: Arc<dyn IntentCache>,
    feedback: Arc<dyn FeedbackStore>,
    decisions: Arc<dyn DecisionLog>,
}

impl Pipeline {
    pub fn new(
        llm: Arc<dyn LlmGateway>,
        vectors: Arc<dyn VectorStore>,
        intents: Arc<dyn IntentCache>,
        feedback: Arc<dyn FeedbackStore>,
        decisions: Arc<dyn DecisionLog>,
    ) -> Self {
        Self {
            llm,
            offline: Arc::new(OfflineGateway),
            vectors,
            intents,
            feedback,
            decisions,
        }
    }

    /// Pipeline whose stores are all backed by one SQLite database.
    pub fn with_sqlite(llm: Arc<dyn LlmGateway>, store: Arc<SqliteStore>) -> Self {
        Self::new(llm, store.clone(), store.clone(), store.clone(), store)
    }

    /// Air-gapped repositories never reach the external gateway.
    fn gateway_for(&self, config: &RepoConfig) -> &dyn LlmGateway {
        if config.air_gapped {
            self.offline.as_ref()
        } else {
            self.llm.as_ref()
        }
    }

    /// Analyse one PR snapshot and record the outcome.
    /// Failed runs return the error and record nothing.
    #[instrument(skip_all, fields(repo = %pr.repo_full_name, pr = pr.number, head = %pr.head_sha))]
    pub async fn run(
        &self,
        pr: &PullRequestData,
        config: &RepoConfig,
    ) -> Result<AnalysisOutcome, PipelineError> {
        info!("starting analysis");
        let ctx = RunContext { pr, config };
        let outcome = self.evaluate(&ctx).await?;
        let decision_id = self.decisions.record(outcome.to_record(pr)).await?;
        info!(outcome = %outcome, decision_id, "analysis complete");
        Ok(outcome)
    }

    async fn evaluate(&self, ctx: &RunContext<'_>) -> Result<AnalysisOutcome, PipelineError> {
        if !ctx.config.enabled {
            return Ok(AnalysisOutcome::Disabled);
        }

        if let Some(reason) = quick_exit::check(ctx) {
            info!(reason = %reason, "quick exit");
            return Ok(AnalysisOutcome::QuickExit(reason));
        }

        let llm = self.gateway_for(ctx.config);

        let candidates = embeddings::retrieve_candidates(ctx, llm, self.vectors.as_ref()).await?;
        if candidates.is_empty() {
            return Ok(AnalysisOutcome::NoCandidates);
        }

        let cheap_matches =
            file_overlap::narrow(ctx, &candidates, self.vectors.as_ref()).await?;
        if cheap_matches.is_empty() {
            return Ok(AnalysisOutcome::NoCheapMatches {
                candidates: candidates.len(),
            });
        }

        let source_intent = intent::extract_intent(ctx, llm, self.intents.as_ref()).await?;

        let mut matches = comparison::compare_candidates(
            ctx,
            &source_intent,
            &cheap_matches,
            llm,
            self.intents.as_ref(),
        )
        .await?;
        matches.retain(|m| m.final_confidence >= ctx.config.semantic_score_threshold);

        let (decision, threshold) = decision::decide_with_feedback(
            &ctx.pr.repo_full_name,
            &matches,
            ctx.config.high_confidence_threshold,
            self.feedback.as_ref(),
        )
        .await?;

        Ok(AnalysisOutcome::Decided {
            decision,
            threshold,
            matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EmbeddingRecord;
    use crate::testing::{sample_intent, sample_pr, StubGateway};

    fn scores(problem: f64, component: f64, behavior: f64) -> serde_json::Value {
        serde_json::json!({
            "problemSimilarity": problem,
            "componentOverlap": component,
            "behavioralEquivalence": behavior,
            "justification": "Same login fix"
        })
    }

    async fn seed_candidate(store: &SqliteStore, pr_number: u64, files: &[&str]) {
        let pr = sample_pr(pr_number, files);
        store
            .upsert(EmbeddingRecord {
                repo_full_name: pr.repo_full_name.clone(),
                pr_number,
                head_sha: pr.head_sha.clone(),
                title: pr.title.clone(),
                description_snippet: String::new(),
                author: "bob".to_string(),
                state: pr.state,
                embedding_model: "stub-embedding".to_string(),
                embedding: vec![1.0, 0.0],
                files_changed: pr.file_paths(),
            })
            .await
            .unwrap();
        store
            .put(&pr.repo_full_name, pr_number, &pr.head_sha, &sample_intent("Fix login"))
            .await
            .unwrap();
    }

    fn pipeline(llm: Arc<StubGateway>, store: Arc<SqliteStore>) -> Pipeline {
        Pipeline::with_sqlite(llm, store)
    }

    #[tokio::test]
    async fn test_empty_store_takes_no_action_without_comparisons() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let llm = Arc::new(StubGateway::with_embedding(vec![1.0, 0.0]));
        let pr = sample_pr(1, &["src/auth.rs"]);

        let outcome = pipeline(llm.clone(), store.clone())
            .run(&pr, &RepoConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::NoCandidates);
        assert_eq!(outcome.action(), DecisionAction::NoAction);
        assert_eq!(llm.generate_calls(), 0);
        assert!(store.latest_for("org/repo", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_flags_duplicate_end_to_end() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed_candidate(&store, 7, &["src/auth.rs", "src/login.rs"]).await;

        let llm = Arc::new(StubGateway::with_embedding(vec![1.0, 0.0]));
        llm.push_response(Ok(serde_json::to_value(sample_intent("Fix login")).unwrap()));
        llm.push_response(Ok(scores(0.9, 1.0, 0.9)));

        let pr = sample_pr(12, &["src/auth.rs", "src/login.rs"]);
        let outcome = pipeline(llm.clone(), store.clone())
            .run(&pr, &RepoConfig::default())
            .await
            .unwrap();

        match &outcome {
            AnalysisOutcome::Decided {
                decision: Decision::CommentDuplicate { pr_number, confidence, .. },
                threshold,
                matches,
            } => {
                assert_eq!(*pr_number, 7);
                assert!((confidence - 0.92).abs() < 1e-6);
                assert_eq!(*threshold, 0.85);
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].matched_files, vec!["src/auth.rs", "src/login.rs"]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(llm.generate_calls(), 2);
        // The new PR's intent is cached for later comparisons
        assert!(store.get("org/repo", 12, "sha-12").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_weak_semantic_matches_are_discarded() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed_candidate(&store, 7, &["src/auth.rs"]).await;

        let llm = Arc::new(StubGateway::with_embedding(vec![1.0, 0.0]));
        llm.push_response(Ok(serde_json::to_value(sample_intent("Fix login")).unwrap()));
        llm.push_response(Ok(scores(0.2, 0.9, 0.1)));

        let pr = sample_pr(12, &["src/auth.rs"]);
        let outcome = pipeline(llm, store)
            .run(&pr, &RepoConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AnalysisOutcome::Decided { decision: Decision::NoAction, ref matches, .. } if matches.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_quick_exit_and_disabled_skip_all_io() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let llm = Arc::new(StubGateway::with_embedding(vec![1.0, 0.0]));
        let pipeline = pipeline(llm.clone(), store.clone());

        let mut bot_pr = sample_pr(1, &[]);
        bot_pr.author = "dependabot[bot]".to_string();
        let outcome = pipeline.run(&bot_pr, &RepoConfig::default()).await.unwrap();
        assert_eq!(outcome, AnalysisOutcome::QuickExit(ExitReason::AuthorIsBot));
        assert_eq!(outcome.action(), DecisionAction::Skipped);

        let disabled = RepoConfig {
            enabled: false,
            ..RepoConfig::default()
        };
        let outcome = pipeline.run(&sample_pr(2, &[]), &disabled).await.unwrap();
        assert_eq!(outcome, AnalysisOutcome::Disabled);
        assert_eq!(llm.embed_calls(), 0);
    }

    #[tokio::test]
    async fn test_air_gapped_repo_never_calls_external_gateway() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let llm = Arc::new(StubGateway::with_embedding(vec![1.0, 0.0]));
        let pipeline = pipeline(llm.clone(), store.clone());
        let config = RepoConfig {
            air_gapped: true,
            ..RepoConfig::default()
        };

        let first = sample_pr(1, &["src/auth.rs"]);
        pipeline.run(&first, &config).await.unwrap();
        let second = sample_pr(2, &["src/auth.rs"]);
        let outcome = pipeline.run(&second, &config).await.unwrap();

        assert_eq!(llm.embed_calls(), 0);
        assert_eq!(llm.generate_calls(), 0);
        // Identical descriptions match locally; PR 1 has no cached intent so
        // the comparison stage has nothing to score.
        assert!(matches!(
            outcome,
            AnalysisOutcome::Decided { decision: Decision::NoAction, ref matches, .. } if matches.is_empty()
        ));
        let fallback = store.get("org/repo", 2, "sha-2").await.unwrap().unwrap();
        assert_eq!(fallback.affected_component, "unknown");
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_without_decision_record() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let llm = Arc::new(StubGateway::failing_embed());
        let pr = sample_pr(1, &[]);

        let result = pipeline(llm, store.clone())
            .run(&pr, &RepoConfig::default())
            .await;
        assert!(matches!(result, Err(PipelineError::Llm(_))));
        assert_eq!(store.latest_for("org/repo", 1).await.unwrap(), None);
    }
}
