//! Configuration loader with tier-based merging.

use super::merge::deep_merge_all;
use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    /// `./homework/config.yaml`
    Project = 1,
    /// `~/.homework/config.yaml`
    User = 2,
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    pub fn discover() -> Self {
        Self {
            project_dir: Some(PathBuf::from("homework")),
            user_dir: dirs::home_dir().map(|h| h.join(".homework")),
        }
    }

    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }

    fn config_file(&self, tier: ConfigTier) -> Option<PathBuf> {
        let dir = match tier {
            ConfigTier::Project => self.project_dir.as_ref(),
            ConfigTier::User => self.user_dir.as_ref(),
            _ => None,
        }?;
        Some(dir.join("config.yaml"))
    }
}

/// Loads and merges configuration from every tier.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Files that contributed, lowest tier first.
    sources: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn load() -> Result<Self> {
        Self::load_with_paths(ConfigPaths::discover())
    }

    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        // An explicit file replaces the file tiers entirely.
        if let Ok(explicit) = std::env::var("HOMEWORK_CONFIG_PATH") {
            return Self::load_explicit(paths, Path::new(&explicit));
        }

        let mut values = Vec::new();
        let mut sources = Vec::new();

        values.push(serde_json::to_value(Config::default())?);

        for tier in [ConfigTier::Project, ConfigTier::User] {
            let Some(file) = paths.config_file(tier) else {
                continue;
            };
            if let Some(value) = read_yaml(&file) {
                debug!(tier = %tier, path = %file.display(), "Loaded config file");
                values.push(value);
                sources.push(file);
            }
        }

        let mut config: Config = serde_json::from_value(deep_merge_all(values))
            .context("invalid configuration")?;
        apply_env_overrides(&mut config);

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    /// Load a single file, still applying environment overrides on top.
    /// Load for a command line that may name a config file. A named file
    /// replaces the file tiers, the same way `HOMEWORK_CONFIG_PATH` does.
    pub fn load_with_override(paths: ConfigPaths, explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_explicit(paths, path),
            None => Self::load_with_paths(paths),
        }
    }

    pub fn load_explicit(paths: ConfigPaths, path: &Path) -> Result<Self> {
        let mut config = Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        apply_env_overrides(&mut config);
        Ok(Self {
            paths,
            config,
            sources: vec![path.to_path_buf()],
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}

/// Parse a YAML file into a mergeable value. Unreadable files are skipped.
fn read_yaml(path: &Path) -> Option<Value> {
    if !path.exists() {
        return None;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read config file");
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unparsable config file");
            None
        }
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(db_path) = std::env::var("HOMEWORK_DB_PATH") {
        config.server.db_path = PathBuf::from(db_path);
    }

    if let Ok(key) = std::env::var("HOMEWORK_WORKER_API_KEY") {
        config.server.worker_api_key = Some(key).filter(|k| !k.is_empty());
    }

    if let Ok(url) = std::env::var("HOMEWORK_EXTRACTOR_URL") {
        config.extractor.base_url = url;
    }
}
