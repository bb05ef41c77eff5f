use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::retry::RetryPolicy;
use super::{parse_structured, LlmError, LlmGateway};
use crate::config::LlmConfig;

/// LLM gateway backed by the Gemini REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    config: LlmConfig,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_none() {
            warn!("GEMINI_API_KEY is not set; LLM calls will fail");
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            retry: RetryPolicy::from_config(config),
        })
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.config.api_key.as_deref().ok_or(LlmError::MissingApiKey)
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, LlmError> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", self.api_key()?)
            .json(body)
            .send()
            .await?;
        let response = check_response(response).await?;
        Ok(response.json::<R>().await?)
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbedRequest {
            model: format!("models/{}", self.config.embedding_model),
            content: Content::user(text),
        };
        let url = self.endpoint(&self.config.embedding_model, "embedContent");
        let response: EmbedResponse = self.post(&url, &request).await?;
        if response.embedding.values.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(response.embedding.values)
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, LlmError> {
        let request = GenerateRequest {
            contents: vec![Content::user(prompt)],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                response_mime_type: "application/json",
            },
        };
        let url = self.endpoint(&self.config.generation_model, "generateContent");
        let response: GenerateResponse = self.post(&url, &request).await?;
        response.text().ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl LlmGateway for GeminiClient {
    fn embedding_model(&self) -> &str {
        &self.config.embedding_model
    }

    #[instrument(skip_all, fields(model = %self.config.embedding_model, chars = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let values = self.retry.run(|_| self.embed_once(text)).await?;
        debug!(dimensions = values.len(), "received embedding");
        Ok(values)
    }

    #[instrument(skip_all, fields(model = %self.config.generation_model, prompt_chars = prompt.len()))]
    async fn generate_structured(&self, prompt: &str) -> Result<serde_json::Value, LlmError> {
        let raw = self.retry.run(|_| self.generate_once(prompt)).await?;
        debug!(response_chars = raw.len(), "received generation");
        parse_structured(&raw)
    }
}

/// Map 429 to [`LlmError::RateLimited`] and any other non-success status to
/// [`LlmError::Api`].
async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited {
            retry_after_secs: parse_retry_after(&response),
        });
    }
    if !response.status().is_success() {
        return Err(LlmError::Api {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }
    Ok(response)
}

fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: "user",
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
