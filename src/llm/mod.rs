pub mod gemini;
pub mod offline;
pub mod retry;

pub use gemini::GeminiClient;
pub use offline::OfflineGateway;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("LLM API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM returned malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("LLM API key not configured")]
    MissingApiKey,

    #[error("External LLM calls are disabled for this repository")]
    Disabled,
}

impl LlmError {
    /// Only rate limiting is worth retrying; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }
}

/// Embedding and structured-generation service used by the pipeline.
/// Implementations handle their own rate-limit backoff and return either a
/// result or a terminal error.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Identifies the vector space `embed` produces; vectors from different
    /// models are never compared.
    fn embedding_model(&self) -> &str;

    /// Compute an embedding vector for `text`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Run `prompt` and parse the model's answer as a JSON value.
    async fn generate_structured(&self, prompt: &str) -> Result<serde_json::Value, LlmError>;
}

/// Strip a surrounding markdown code fence (```` ```json ... ``` ````) from raw model output.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse raw model text into JSON, tolerating code fences.
pub fn parse_structured(raw: &str) -> Result<serde_json::Value, LlmError> {
    Ok(serde_json::from_str(strip_code_fences(raw))?)
}
