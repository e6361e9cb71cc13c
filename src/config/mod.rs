//! Tiered configuration.
//!
//! Tiers, lowest to highest priority, merged field by field:
//! 1. **Defaults** - `Config::default()`
//! 2. **Project** - `./homework/config.yaml`
//! 3. **User** - `~/.homework/config.yaml`
//! 4. **Environment** - the variables below
//!
//! ## Environment Variables
//! - `HOMEWORK_CONFIG_PATH` - Explicit config file (replaces the file tiers)
//! - `HOMEWORK_DB_PATH` - Database path
//! - `HOMEWORK_WORKER_API_KEY` - Key for the internal job status endpoint
//! - `HOMEWORK_EXTRACTOR_URL` - Base URL of the extraction service
//! - `OPENAI_API_KEY` - Extraction service key (name set by `extractor.api_key_env`)

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::deep_merge;
pub use types::*;
