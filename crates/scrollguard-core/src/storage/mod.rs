mod config;
pub mod database;
pub mod kv;
pub mod time_store;

pub use config::{
    BlockingConfig, Config, EscalationConfig, NewsConfig, ReminderConfig, SitesConfig,
};
pub use database::Database;
pub use kv::{KvStore, MemoryKv};
pub use time_store::{
    format_time, BlockRecord, BlockScope, KvTimeManager, NewsUsage, SiteCategory, TimeManager,
};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/scrollguard[-dev]/` based on SCROLLGUARD_ENV.
///
/// Set SCROLLGUARD_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("SCROLLGUARD_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("scrollguard-dev")
    } else {
        base_dir.join("scrollguard")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
