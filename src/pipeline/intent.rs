use tracing::{debug, info, instrument, warn};

use super::{PipelineError, RunContext};
use crate::llm::{LlmError, LlmGateway};
use crate::pr::{PullRequestData, PullRequestIntent};
use crate::store::IntentCache;

/// Characters of the changed-file list included in the extraction prompt.
const FILE_LIST_CHARS: usize = 2000;

/// States of a single cache-or-extract pass.
enum Extraction {
    Lookup,
    Extract,
    Fallback(LlmError),
    Persist(PullRequestIntent),
    Done(PullRequestIntent),
}

/// Stage 3: the PR's intent, from the cache when this head commit was seen
/// before, otherwise extracted by the LLM and cached.
///
/// An extraction failure is cached as a fallback intent so the same commit is
/// never sent to the model twice. Cache failures propagate.
#[instrument(skip_all, fields(repo = %ctx.pr.repo_full_name, pr = ctx.pr.number, head = %ctx.pr.head_sha))]
pub async fn extract_intent(
    ctx: &RunContext<'_>,
    llm: &dyn LlmGateway,
    cache: &dyn IntentCache,
) -> Result<PullRequestIntent, PipelineError> {
    let pr = ctx.pr;
    let mut state = Extraction::Lookup;
    loop {
        state = match state {
            Extraction::Lookup => {
                match cache
                    .get(&pr.repo_full_name, pr.number, &pr.head_sha)
                    .await?
                {
                    Some(intent) => {
                        debug!("intent cache hit");
                        Extraction::Done(intent)
                    }
                    None => Extraction::Extract,
                }
            }
            Extraction::Extract => {
                let prompt = extraction_prompt(pr);
                match llm.generate_structured(&prompt).await {
                    Ok(value) => match serde_json::from_value::<PullRequestIntent>(value) {
                        Ok(intent) => Extraction::Persist(intent),
                        Err(e) => Extraction::Fallback(LlmError::MalformedJson(e)),
                    },
                    Err(e) => Extraction::Fallback(e),
                }
            }
            Extraction::Fallback(err) => {
                warn!(error = %err, "intent extraction failed, caching fallback");
                Extraction::Persist(PullRequestIntent::fallback(
                    pr.number,
                    &err.to_string(),
                    pr.file_paths(),
                ))
            }
            Extraction::Persist(intent) => {
                cache
                    .put(&pr.repo_full_name, pr.number, &pr.head_sha, &intent)
                    .await?;
                info!(change_type = ?intent.change_type, component = %intent.affected_component, "cached intent");
                Extraction::Done(intent)
            }
            Extraction::Done(intent) => return Ok(intent),
        };
    }
}

fn extraction_prompt(pr: &PullRequestData) -> String {
    let file_list = pr
        .files
        .iter()
        .map(|f| format!("{}: {}", f.kind, f.path))
        .collect::<Vec<_>>()
        .join("\n");
    let truncated: String = file_list.chars().take(FILE_LIST_CHARS).collect();
    let marker = if file_list.chars().count() > FILE_LIST_CHARS {
        " ...(truncated)"
    } else {
        ""
    };

    format!(
        r#"Summarize the intent of this pull request as JSON.

TITLE: {title}
DESCRIPTION: {body}
FILES CHANGED:
{files}{marker}

Respond with a single JSON object of this shape:
{{
  "problemBeingSolved": "the bug or requirement that motivates the change",
  "affectedComponent": "the logical component that changes (e.g. Auth, Billing API, Settings page)",
  "behavioralChange": "how the system behaves differently afterwards",
  "changeType": "bugfix" | "feature" | "refactor" | "performance" | "docs" | "test",
  "changeMagnitude": "minor" | "moderate" | "major",
  "keyChanges": {{
    "files": ["the most important files"],
    "functions": ["key functions or methods, if identifiable"]
  }}
}}"#,
        title = pr.title,
        body = pr.body.as_deref().unwrap_or("No description provided."),
        files = truncated,
        marker = marker,
    )
}
