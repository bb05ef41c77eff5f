mod config;
mod feedback;
mod llm;
mod pipeline;
mod pr;
mod report;
mod store;
#[cfg(test)]
mod testing;
mod webhook;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span};
use tracing_subscriber::EnvFilter;

use config::Config;
use feedback::FeedbackService;
use llm::GeminiClient;
use pipeline::Pipeline;
use store::SqliteStore;
use webhook::payload::PullRequestEvent;

/// PR Dedup: detects pull requests that solve the same problem as one
/// already open, using embeddings, file overlap and LLM intent comparison.
#[derive(Parser, Debug)]
#[command(name = "pr-dedup", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the webhook server
    Serve {
        /// Config file (defaults to ./.pr-dedup.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Analyse a saved `pull_request` webhook payload and print the report
    Analyze {
        /// Path to the webhook JSON payload
        payload: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Optional output file path for markdown report
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => {
            let config = load_config(config.as_deref())?;
            let (pipeline, store) = build_pipeline(&config)?;
            let state = webhook::AppState {
                pipeline,
                feedback: FeedbackService::new(store.clone(), store),
                config: Arc::new(config.clone()),
            };
            webhook::serve(state, &config.server.bind_addr).await?;
        }
        Command::Analyze {
            payload,
            config,
            output,
        } => {
            let _span = info_span!("analyze", payload = %payload.display()).entered();

            let config = load_config(config.as_deref())?;
            let (pipeline, _) = build_pipeline(&config)?;

            info!("reading webhook payload");
            let raw = std::fs::read(&payload)?;
            let event: PullRequestEvent = serde_json::from_slice(&raw)?;
            let repo_config = config.repo_config(&event.repository.full_name);
            let pr = event.normalize(&repo_config);
            debug!(repo = %pr.repo_full_name, pr = pr.number, files = pr.files.len(), "normalized PR");

            let outcome = pipeline.run(&pr, &repo_config).await?;

            info!("generating report");
            let built_report = report::build(&outcome, &pr);
            report::output(&built_report, output.as_deref())?;
            info!(verdict = %built_report.verdict, "done");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    info!("loading configuration");
    match path {
        Some(path) => Config::load_path(path),
        None => Config::load(),
    }
}

fn build_pipeline(
    config: &Config,
) -> Result<(Pipeline, Arc<SqliteStore>), Box<dyn std::error::Error>> {
    let db_path = &config.storage.database_path;
    info!(path = %db_path.display(), "opening database");
    let store = Arc::new(SqliteStore::open(db_path)?);
    let llm = Arc::new(GeminiClient::new(&config.llm)?);
    Ok((Pipeline::with_sqlite(llm, store.clone()), store))
}
