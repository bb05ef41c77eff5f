use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use crate::store::{DecisionLog, FeedbackEvent, FeedbackStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    /// The flagged PR really was a duplicate (`/duplicate`).
    Positive,
    /// The flag was wrong (`/not-duplicate`).
    Negative,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Positive => "positive",
            FeedbackKind::Negative => "negative",
        }
    }

    #[cfg(test)]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "positive" => Some(FeedbackKind::Positive),
            "negative" => Some(FeedbackKind::Negative),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-repository feedback totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackStats {
    pub positive: u64,
    pub negative: u64,
}

impl FeedbackStats {
    /// Share of feedback that was negative; 0 with no feedback.
    pub fn false_positive_rate(&self) -> f64 {
        let total = self.positive + self.negative;
        if total == 0 {
            0.0
        } else {
            self.negative as f64 / total as f64
        }
    }
}

/// Feedback command carried by a PR comment, if any.
/// `/duplicate` wins when a comment carries both commands.
pub fn parse_command(comment_body: &str) -> Option<FeedbackKind> {
    if comment_body.contains("/duplicate") {
        Some(FeedbackKind::Positive)
    } else if comment_body.contains("/not-duplicate") {
        Some(FeedbackKind::Negative)
    } else {
        None
    }
}

/// Records feedback events, linking each to the latest decision on its PR.
#[derive(Clone)]
pub struct FeedbackService {
    feedback: Arc<dyn FeedbackStore>,
    decisions: Arc<dyn DecisionLog>,
}

impl FeedbackService {
    pub fn new(feedback: Arc<dyn FeedbackStore>, decisions: Arc<dyn DecisionLog>) -> Self {
        Self {
            feedback,
            decisions,
        }
    }

    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn record(
        &self,
        repo_full_name: &str,
        pr_number: u64,
        user_id: &str,
        kind: FeedbackKind,
        comment_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let decision_id = self.decisions.latest_for(repo_full_name, pr_number).await?;
        self.feedback
            .append(FeedbackEvent {
                repo_full_name: repo_full_name.to_string(),
                pr_number,
                user_id: user_id.to_string(),
                kind,
                comment_id,
                decision_id,
                created_at: Utc::now(),
            })
            .await?;
        info!(repo = %repo_full_name, pr = pr_number, user = %user_id, ?decision_id, "recorded feedback");
        Ok(())
    }
}
