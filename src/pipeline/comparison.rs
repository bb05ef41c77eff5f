use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::file_overlap::FileOverlap;
use super::{PipelineError, RunContext};
use crate::llm::{LlmError, LlmGateway};
use crate::pr::PullRequestIntent;
use crate::store::IntentCache;

const PROBLEM_WEIGHT: f64 = 0.5;
const BEHAVIOR_WEIGHT: f64 = 0.3;
const COMPONENT_WEIGHT: f64 = 0.2;

/// Sub-scores returned by the comparison prompt, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticScores {
    pub problem_similarity: f64,
    pub component_overlap: f64,
    pub behavioral_equivalence: f64,
}

impl SemanticScores {
    /// Weighted blend; problem identity counts most, component overlap least.
    pub fn final_confidence(&self) -> f64 {
        PROBLEM_WEIGHT * self.problem_similarity
            + BEHAVIOR_WEIGHT * self.behavioral_equivalence
            + COMPONENT_WEIGHT * self.component_overlap
    }

    fn clamped(self) -> Self {
        Self {
            problem_similarity: clamp_unit(self.problem_similarity),
            component_overlap: clamp_unit(self.component_overlap),
            behavioral_equivalence: clamp_unit(self.behavioral_equivalence),
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// An LLM-scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMatch {
    pub pr_number: u64,
    pub scores: SemanticScores,
    pub final_confidence: f64,
    pub justification: String,
    /// Jaccard score carried over from the file-overlap stage
    pub file_overlap: f64,
    pub matched_files: Vec<String>,
}

#[derive(Deserialize)]
struct ComparisonResponse {
    #[serde(flatten)]
    scores: SemanticScores,
    #[serde(default)]
    justification: String,
}

/// Stage 4: compare the PR's intent with each cheap match's cached intent.
///
/// Candidates without a cached intent are skipped without an LLM call, and a
/// failed comparison drops only that candidate. The result is unsorted.
#[instrument(skip_all, fields(repo = %ctx.pr.repo_full_name, pr = ctx.pr.number, candidates = candidates.len()))]
pub async fn compare_candidates(
    ctx: &RunContext<'_>,
    source: &PullRequestIntent,
    candidates: &[FileOverlap],
    llm: &dyn LlmGateway,
    cache: &dyn IntentCache,
) -> Result<Vec<SemanticMatch>, PipelineError> {
    let repo = &ctx.pr.repo_full_name;
    let mut matches = Vec::new();

    for candidate in candidates {
        let Some(candidate_intent) = cache.latest(repo, candidate.pr_number).await? else {
            debug!(candidate = candidate.pr_number, "no cached intent, skipping");
            continue;
        };

        match compare_pair(source, &candidate_intent, llm).await {
            Ok(response) => {
                let scores = response.scores.clamped();
                let final_confidence = scores.final_confidence();
                debug!(candidate = candidate.pr_number, final_confidence, "compared intents");
                matches.push(SemanticMatch {
                    pr_number: candidate.pr_number,
                    scores,
                    final_confidence,
                    justification: response.justification,
                    file_overlap: candidate.score,
                    matched_files: candidate.matched_files.clone(),
                });
            }
            Err(e) => {
                warn!(candidate = candidate.pr_number, error = %e, "intent comparison failed");
            }
        }
    }

    info!(semantic_matches = matches.len(), "intent comparison");
    Ok(matches)
}

async fn compare_pair(
    source: &PullRequestIntent,
    candidate: &PullRequestIntent,
    llm: &dyn LlmGateway,
) -> Result<ComparisonResponse, LlmError> {
    let prompt = comparison_prompt(source, candidate)?;
    let value = llm.generate_structured(&prompt).await?;
    Ok(serde_json::from_value(value)?)
}

fn comparison_prompt(
    source: &PullRequestIntent,
    candidate: &PullRequestIntent,
) -> Result<String, LlmError> {
    Ok(format!(
        r#"Decide whether two pull requests are duplicates by comparing their intents.

SOURCE PR INTENT:
{source}

CANDIDATE PR INTENT:
{candidate}

Score each axis from 0.0 to 1.0:
- problemSimilarity: do both solve the same underlying problem?
- componentOverlap: do both change the same logic or components?
- behavioralEquivalence: do both change user-visible or system behavior in the same way?

Respond with a single JSON object:
{{
  "problemSimilarity": 0.0,
  "componentOverlap": 0.0,
  "behavioralEquivalence": 0.0,
  "justification": "one or two sentences explaining the verdict"
}}"#,
        source = serde_json::to_string_pretty(source)?,
        candidate = serde_json::to_string_pretty(candidate)?,
    ))
}
