pub mod payload;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::config::{Config, RepoConfig};
use crate::feedback::{parse_command, FeedbackKind, FeedbackService};
use crate::pipeline::Pipeline;
use crate::pr::PullRequestData;
use crate::store::StoreError;
use payload::{IssueCommentEvent, PullRequestEvent};

/// Header carrying the GitHub event name.
pub const EVENT_HEADER: &str = "x-github-event";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Failed to record feedback: {0}")]
    Feedback(#[from] StoreError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub config: Arc<Config>,
    pub feedback: FeedbackService,
}

/// What a delivery led to. Analysis runs are detached from the response.
#[derive(Debug)]
pub enum Dispatch {
    Analysis(JoinHandle<()>),
    Feedback(FeedbackKind),
    Ignored,
}

impl Dispatch {
    /// Short label for the delivery log line.
    pub fn summary(&self) -> String {
        match self {
            Dispatch::Analysis(handle) if handle.is_finished() => "analysis finished".to_string(),
            Dispatch::Analysis(_) => "analysis running".to_string(),
            Dispatch::Feedback(kind) => format!("{} feedback recorded", kind),
            Dispatch::Ignored => "ignored".to_string(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/webhook", post(receive))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(state: AppState, bind_addr: &str) -> Result<(), WebhookError> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "webhook server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /api/webhook - always answers before any analysis finishes.
async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match handle_event(&state, event, &body).await {
        Ok(dispatch) => {
            debug!(event, outcome = %dispatch.summary(), "webhook accepted");
            (StatusCode::OK, "Accepted")
        }
        Err(e) => {
            error!(event, error = %e, "webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

#[instrument(skip(state, body), fields(bytes = body.len()))]
pub async fn handle_event(
    state: &AppState,
    event: &str,
    body: &[u8],
) -> Result<Dispatch, WebhookError> {
    match event {
        "pull_request" => {
            let event: PullRequestEvent = serde_json::from_slice(body)?;
            if !event.should_analyze() {
                debug!(action = %event.action, "ignoring pull_request action");
                return Ok(Dispatch::Ignored);
            }
            let repo_config = state.config.repo_config(&event.repository.full_name);
            let pr = event.normalize(&repo_config);
            Ok(Dispatch::Analysis(spawn_analysis(
                state.pipeline.clone(),
                pr,
                repo_config,
            )))
        }
        "issue_comment" => {
            let event: IssueCommentEvent = serde_json::from_slice(body)?;
            if !event.is_new_pr_comment() {
                return Ok(Dispatch::Ignored);
            }
            let Some(kind) = parse_command(&event.comment.body) else {
                return Ok(Dispatch::Ignored);
            };
            state
                .feedback
                .record(
                    &event.repository.full_name,
                    event.issue.number,
                    &event.comment.user.login,
                    kind,
                    Some(event.comment.id),
                )
                .await?;
            Ok(Dispatch::Feedback(kind))
        }
        other => {
            debug!(event = %other, "ignoring event");
            Ok(Dispatch::Ignored)
        }
    }
}

fn spawn_analysis(pipeline: Pipeline, pr: PullRequestData, config: RepoConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = pipeline.run(&pr, &config).await {
            error!(
                repo = %pr.repo_full_name,
                pr = pr.number,
                error = %e,
                "pipeline run failed"
            );
        }
    })
}
