use tracing::{debug, info, instrument};

use super::{PipelineError, RunContext};
use crate::llm::LlmGateway;
use crate::store::{EmbeddingRecord, VectorStore};

/// Maximum candidates returned by the nearest-neighbour query.
pub const CANDIDATE_LIMIT: usize = 10;

/// A previously analysed PR whose description embedding is close to the new one.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCandidate {
    pub pr_number: u64,
    pub similarity: f64,
}

/// Stage 1: embed the PR description, look up similar PRs in the same
/// repository, then store this PR's own embedding for future runs.
///
/// Embedding failures propagate: an empty candidate list would silently
/// disable detection.
#[instrument(skip_all, fields(repo = %ctx.pr.repo_full_name, pr = ctx.pr.number))]
pub async fn retrieve_candidates(
    ctx: &RunContext<'_>,
    llm: &dyn LlmGateway,
    vectors: &dyn VectorStore,
) -> Result<Vec<EmbeddingCandidate>, PipelineError> {
    let pr = ctx.pr;
    let embedding = llm.embed(&pr.embedding_text()).await?;
    debug!(dimensions = embedding.len(), "embedded PR description");

    let threshold = ctx.config.embedding_score_threshold;
    let candidates: Vec<EmbeddingCandidate> = vectors
        .query_nearest(
            &pr.repo_full_name,
            pr.number,
            llm.embedding_model(),
            &embedding,
            threshold,
            CANDIDATE_LIMIT,
        )
        .await?
        .into_iter()
        .map(|hit| EmbeddingCandidate {
            pr_number: hit.pr_number,
            similarity: hit.score,
        })
        .collect();

    info!(
        candidates = candidates.len(),
        threshold,
        top_score = candidates.first().map(|c| c.similarity),
        "embedding candidates"
    );

    vectors
        .upsert(EmbeddingRecord {
            repo_full_name: pr.repo_full_name.clone(),
            pr_number: pr.number,
            head_sha: pr.head_sha.clone(),
            title: pr.title.clone(),
            description_snippet: pr.body_snippet(ctx.config.snippet_chars),
            author: pr.author.clone(),
            state: pr.state,
            embedding_model: llm.embedding_model().to_string(),
            embedding,
            files_changed: pr.file_paths(),
        })
        .await?;

    Ok(candidates)
}
