//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Escalation timings (flash cadence, decay, transition countdown)
//! - Periodic reminder cadence
//! - Block duration and the daily news-reading allowance
//! - The blocked and news site lists
//!
//! Configuration is stored at `~/.config/scrollguard/config.toml`. Every
//! field carries its own serde default, so a partial file overrides only the
//! keys it names and unknown keys are ignored.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Timings for the warning → fade → countdown → block pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Block stage poll cadence.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Warning flash toggle cadence.
    #[serde(default = "default_flash_interval_ms")]
    pub flash_interval_ms: u64,
    /// How long the warning stage runs before the page content is gone.
    #[serde(default = "default_screen_decay_ms")]
    pub screen_decay_ms: u64,
    /// Length of the final countdown before the block is created.
    #[serde(default = "default_transition_duration_ms")]
    pub transition_duration_ms: u64,
    /// Seconds shown by the fade transition countdown.
    #[serde(default = "default_fade_countdown_secs")]
    pub fade_countdown_secs: u64,
}

/// Periodic reminder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reminder_interval_ms")]
    pub interval_ms: u64,
}

/// Block record configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingConfig {
    #[serde(default = "default_block_duration_min")]
    pub block_duration_min: u64,
}

/// News reading allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsConfig {
    #[serde(default = "default_daily_limit_min")]
    pub daily_limit_min: u64,
    /// Samples further apart than this are treated as host sleep and dropped.
    #[serde(default = "default_max_tracking_gap_ms")]
    pub max_tracking_gap_ms: u64,
}

/// Site lists used by the list classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitesConfig {
    #[serde(default = "default_blocked_sites")]
    pub blocked: Vec<String>,
    #[serde(default = "default_news_sites")]
    pub news: Vec<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/scrollguard/config.toml`. Values are
/// stored as written; the duration accessors clamp anything above one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub reminder: ReminderConfig,
    #[serde(default)]
    pub blocking: BlockingConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub sites: SitesConfig,
}

// Default functions
fn default_update_interval_ms() -> u64 {
    1000
}
fn default_flash_interval_ms() -> u64 {
    400
}
fn default_screen_decay_ms() -> u64 {
    7000
}
fn default_transition_duration_ms() -> u64 {
    3000
}
fn default_fade_countdown_secs() -> u64 {
    5
}
fn default_reminder_interval_ms() -> u64 {
    5 * 60 * 1000
}
fn default_block_duration_min() -> u64 {
    30
}
fn default_daily_limit_min() -> u64 {
    20
}
fn default_max_tracking_gap_ms() -> u64 {
    60 * 1000
}
fn default_true() -> bool {
    true
}
fn default_blocked_sites() -> Vec<String> {
    ["reddit.com", "twitter.com", "x.com", "instagram.com", "tiktok.com", "facebook.com"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_news_sites() -> Vec<String> {
    ["cnn.com", "bbc.com", "nytimes.com", "theguardian.com", "news.ycombinator.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            flash_interval_ms: default_flash_interval_ms(),
            screen_decay_ms: default_screen_decay_ms(),
            transition_duration_ms: default_transition_duration_ms(),
            fade_countdown_secs: default_fade_countdown_secs(),
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_reminder_interval_ms(),
        }
    }
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            block_duration_min: default_block_duration_min(),
        }
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            daily_limit_min: default_daily_limit_min(),
            max_tracking_gap_ms: default_max_tracking_gap_ms(),
        }
    }
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            blocked: default_blocked_sites(),
            news: default_news_sites(),
        }
    }
}

/// Longest duration any timer or block may be configured with (one year).
/// Larger values are kept in the file but clamped when converted.
const MAX_CONFIGURED_MS: u64 = 365 * 24 * 60 * 60 * 1000;

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(MAX_CONFIGURED_MS) as i64)
}

impl EscalationConfig {
    pub fn update_interval(&self) -> Duration {
        millis(self.update_interval_ms)
    }

    pub fn flash_interval(&self) -> Duration {
        millis(self.flash_interval_ms)
    }

    pub fn screen_decay(&self) -> Duration {
        millis(self.screen_decay_ms)
    }

    pub fn transition_duration(&self) -> Duration {
        millis(self.transition_duration_ms)
    }
}

impl ReminderConfig {
    pub fn interval(&self) -> Duration {
        millis(self.interval_ms)
    }
}

impl BlockingConfig {
    pub fn block_duration(&self) -> Duration {
        millis(self.block_duration_min.saturating_mul(60_000))
    }
}

impl NewsConfig {
    pub fn daily_limit_ms(&self) -> u64 {
        self.daily_limit_min.saturating_mul(60_000)
    }

    pub fn max_tracking_gap(&self) -> Duration {
        millis(self.max_tracking_gap_ms)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Array(_) => {
                        // Accept either a JSON array or a comma-separated list.
                        if value.trim_start().starts_with('[') {
                            serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                        } else {
                            serde_json::Value::Array(
                                value
                                    .split(',')
                                    .map(str::trim)
                                    .filter(|s| !s.is_empty())
                                    .map(|s| serde_json::Value::String(s.to_string()))
                                    .collect(),
                            )
                        }
                    }
                    serde_json::Value::Object(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing defaults if no file exists.
    ///
    /// A file that exists but cannot be read is an error and is left as is.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let load_failed = |message: String| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message,
        };
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| load_failed(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(load_failed(e.to_string())),
        }
    }

    /// Persist to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without persisting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Falling back to default config: {}", e);
            Self::default()
        })
    }
}
