use tracing::{info, instrument};

use super::comparison::SemanticMatch;
use super::PipelineError;
use crate::feedback::FeedbackStats;
use crate::store::{DecisionAction, FeedbackStore};

/// Largest amount negative feedback can raise the threshold by.
const MAX_ADJUSTMENT: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Flag the PR as a duplicate of `pr_number`.
    CommentDuplicate {
        pr_number: u64,
        confidence: f64,
        justification: String,
    },
    NoAction,
}

impl Decision {
    pub fn action(&self) -> DecisionAction {
        match self {
            Decision::CommentDuplicate { .. } => DecisionAction::CommentDuplicate,
            Decision::NoAction => DecisionAction::NoAction,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::CommentDuplicate { pr_number, .. } => {
                write!(f, "comment_duplicate (PR #{})", pr_number)
            }
            Decision::NoAction => write!(f, "no_action"),
        }
    }
}

/// Decision threshold after feedback: `base + min(fp_rate * 0.1, 0.1)`.
pub fn dynamic_threshold(stats: FeedbackStats, base: f64) -> f64 {
    base + (stats.false_positive_rate() * MAX_ADJUSTMENT).min(MAX_ADJUSTMENT)
}

/// Pick the most confident match; flag it only if it is strictly above `threshold`.
pub fn decide(matches: &[SemanticMatch], threshold: f64) -> Decision {
    let best = matches.iter().max_by(|a, b| {
        a.final_confidence
            .partial_cmp(&b.final_confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    match best {
        Some(m) if m.final_confidence > threshold => Decision::CommentDuplicate {
            pr_number: m.pr_number,
            confidence: m.final_confidence,
            justification: m.justification.clone(),
        },
        _ => Decision::NoAction,
    }
}

/// Stage 5: fold the repository's accumulated feedback into the threshold
/// and decide. Returns the decision and the threshold that was applied.
#[instrument(skip_all, fields(repo = %repo, matches = matches.len()))]
pub async fn decide_with_feedback(
    repo: &str,
    matches: &[SemanticMatch],
    base_threshold: f64,
    feedback: &dyn FeedbackStore,
) -> Result<(Decision, f64), PipelineError> {
    let stats = feedback.aggregate(repo).await?;
    let threshold = dynamic_threshold(stats, base_threshold);
    let decision = decide(matches, threshold);
    info!(
        positive = stats.positive,
        negative = stats.negative,
        threshold,
        decision = %decision,
        "decision"
    );
    Ok((decision, threshold))
}
