use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".pr-dedup.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration loaded from .pr-dedup.toml.
/// All fields are optional; the service runs with zero config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Repository settings applied when no `[repos."owner/name"]` entry exists.
    #[serde(default)]
    pub defaults: RepoConfig,

    /// Per-repository overrides keyed by full name (e.g. "org/repo").
    #[serde(default)]
    pub repos: HashMap<String, RepoConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("pr-dedup.db"),
        }
    }
}

/// Settings for the Gemini-backed LLM gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key. If None, falls back to GEMINI_API_KEY env var.
    pub api_key: Option<String>,
    pub base_url: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            generation_model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            temperature: 0.1,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            timeout_secs: 60,
        }
    }
}

/// Per-repository tunables. Read-only for the duration of a pipeline run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub enabled: bool,
    pub bypass_authors: Vec<String>,
    pub ignore_labels: Vec<String>,
    /// Glob patterns for files excluded from file-overlap scoring.
    pub ignore_files: Vec<String>,
    /// Minimum cosine similarity for a Stage 1 candidate.
    pub embedding_score_threshold: f64,
    /// Minimum Jaccard score for a cheap match.
    pub cheap_score_threshold: f64,
    /// Semantic matches below this confidence never reach the decision stage.
    pub semantic_score_threshold: f64,
    /// Base of the feedback-adjusted decision threshold.
    pub high_confidence_threshold: f64,
    pub is_monorepo: bool,
    pub monorepo: MonorepoConfig,
    /// Disables every external LLM call for this repository.
    pub air_gapped: bool,
    /// Characters of the PR body kept alongside the stored embedding.
    pub snippet_chars: usize,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bypass_authors: Vec::new(),
            ignore_labels: Vec::new(),
            ignore_files: Vec::new(),
            embedding_score_threshold: 0.7,
            cheap_score_threshold: 0.3,
            semantic_score_threshold: 0.65,
            high_confidence_threshold: 0.85,
            is_monorepo: false,
            monorepo: MonorepoConfig::default(),
            air_gapped: false,
            snippet_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonorepoConfig {
    /// Packages whose changes can duplicate a change in any other package.
    pub shared_packages: Vec<String>,
    /// Path prefix → package id, consulted before the directory heuristic.
    pub package_path_map: HashMap<String, String>,
}

impl Config {
    /// Load configuration from .pr-dedup.toml in the current directory.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        let config = if path.exists() {
            Self::load_from(path)?
        } else {
            Config::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_path(path: &Path) -> Result<Config, ConfigError> {
        Ok(Self::load_from(path)?.with_env_overrides())
    }

    /// Load from a specific path without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    fn with_env_overrides(mut self) -> Config {
        if self.llm.api_key.is_none() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(path) = std::env::var("PR_DEDUP_DB") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Ok(port) = std::env::var("PORT") {
            self.server.bind_addr = replace_port(&self.server.bind_addr, &port);
        }
        self
    }

    /// Resolve the settings for a repository: its override entry, or the defaults.
    pub fn repo_config(&self, repo_full_name: &str) -> RepoConfig {
        self.repos
            .get(repo_full_name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}

fn replace_port(bind_addr: &str, port: &str) -> String {
    match bind_addr.rsplit_once(':') {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("{}:{}", bind_addr, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert!(config.defaults.enabled);
        assert_eq!(config.defaults.embedding_score_threshold, 0.7);
        assert_eq!(config.defaults.cheap_score_threshold, 0.3);
        assert_eq!(config.defaults.high_confidence_threshold, 0.85);
        assert!(!config.defaults.air_gapped);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[llm]
generation_model = "gemini-1.5-pro"
max_attempts = 3

[defaults]
bypass_authors = ["release-bot"]
ignore_labels = ["wip"]

[repos."org/monorepo"]
is_monorepo = true
cheap_score_threshold = 0.2

[repos."org/monorepo".monorepo]
shared_packages = ["packages/config"]
package_path_map = { "services/api" = "api" }
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.generation_model, "gemini-1.5-pro");
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.llm.embedding_model, "text-embedding-004");
        assert_eq!(config.defaults.bypass_authors, vec!["release-bot"]);

        let mono = config.repo_config("org/monorepo");
        assert!(mono.is_monorepo);
        assert_eq!(mono.cheap_score_threshold, 0.2);
        assert_eq!(mono.high_confidence_threshold, 0.85);
        assert_eq!(mono.monorepo.package_path_map["services/api"], "api");

        let other = config.repo_config("org/other");
        assert_eq!(other.ignore_labels, vec!["wip"]);
        assert!(!other.is_monorepo);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\ndatabase_path = \"/tmp/dedup.db\"").unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/dedup.db"));
    }

    #[test]
    fn test_load_from_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbind_addr = ").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_replace_port() {
        assert_eq!(replace_port("0.0.0.0:3000", "8080"), "0.0.0.0:8080");
        assert_eq!(replace_port("localhost", "8080"), "localhost:8080");
    }
}
