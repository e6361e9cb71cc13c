//! Configuration types for the homework worker.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub import: ImportConfig,
}

impl Config {
    /// Load configuration from a single YAML file, without tier merging.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // An empty file parses as null.
        let config: Option<Config> = serde_yaml::from_str(&content)?;
        Ok(config.unwrap_or_default())
    }
}

/// Storage and HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Address the HTTP API listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Shared key for `PATCH /internal/jobs/{id}`. The endpoint is disabled when unset.
    #[serde(default)]
    pub worker_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bind: default_bind(),
            worker_api_key: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("homework.db")
}

fn default_bind() -> String {
    "127.0.0.1:8087".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Delay between polls when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

/// Extraction service settings.
///
/// The API key itself never lives in config; `api_key_env` names the
/// environment variable it is read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-5-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Normalization knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Minimum fuzzy score (0-100) to accept a canonical subject.
    #[serde(default = "default_subject_threshold")]
    pub subject_threshold: f64,

    /// Minimum fuzzy score (0-100) to accept a category keyword.
    #[serde(default = "default_category_threshold")]
    pub category_threshold: f64,

    /// Maximum description length in characters before truncation.
    #[serde(default = "default_description_limit")]
    pub description_limit: usize,

    /// Phrases that mark a block as having no homework.
    #[serde(default = "default_no_homework_phrases")]
    pub no_homework_phrases: Vec<String>,

    /// Days added to today for blocks without a date.
    #[serde(default = "default_date_offset_days")]
    pub default_date_offset_days: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            subject_threshold: default_subject_threshold(),
            category_threshold: default_category_threshold(),
            description_limit: default_description_limit(),
            no_homework_phrases: default_no_homework_phrases(),
            default_date_offset_days: default_date_offset_days(),
        }
    }
}

fn default_subject_threshold() -> f64 {
    crate::import::subjects::DEFAULT_SUBJECT_THRESHOLD
}

fn default_category_threshold() -> f64 {
    crate::import::categories::DEFAULT_CATEGORY_THRESHOLD
}

fn default_description_limit() -> usize {
    50
}

fn default_no_homework_phrases() -> Vec<String> {
    ["домашнего задания нет", "нет домашнего задания", "дз нет", "домашки нет"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_date_offset_days() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
worker:
  poll_interval_ms: 500
import:
  description_limit: 80
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.worker.poll_interval_ms, 500);
        assert_eq!(config.import.description_limit, 80);
        assert_eq!(config.import.subject_threshold, 70.0);
        assert_eq!(config.server.bind, "127.0.0.1:8087");
        assert_eq!(config.extractor.model, "gpt-5-mini");
    }

    #[test]
    fn default_phrases_are_lowercase() {
        let config = ImportConfig::default();
        assert_eq!(config.no_homework_phrases.len(), 4);
        assert!(
            config
                .no_homework_phrases
                .iter()
                .all(|p| *p == p.to_lowercase())
        );
    }

    #[test]
    fn empty_file_loads_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.db_path, PathBuf::from("homework.db"));
    }
}
