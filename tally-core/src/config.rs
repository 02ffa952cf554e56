//! Configuration loading for Tally clients.
//!
//! Every section has working defaults; a TOML file only needs the values it
//! overrides. Loaded configs are always validated before use.

use crate::{ConfigError, UndoWindow};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "TALLY_CONFIG";

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TallyConfig {
    pub engine: EngineSection,
    pub cache: CacheSection,
    pub completion: CompletionSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineSection {
    /// Queue mutations that touch the same cache key instead of letting
    /// their speculative writes interleave.
    pub serialize_per_key: bool,
    /// Schedule a refresh of every affected key once a mutation settles.
    pub refresh_on_settle: bool,
    /// Capacity of the cache event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            serialize_per_key: true,
            refresh_on_settle: true,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheSection {
    pub default_max_staleness_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            default_max_staleness_ms: 30_000,
        }
    }
}

impl CacheSection {
    pub fn default_max_staleness(&self) -> Duration {
        Duration::from_millis(self.default_max_staleness_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompletionSection {
    pub undo_window_secs: u64,
    /// Household offset from UTC used for period boundaries.
    pub utc_offset_minutes: i32,
}

impl Default for CompletionSection {
    fn default() -> Self {
        Self {
            undo_window_secs: 300,
            utc_offset_minutes: 0,
        }
    }
}

impl CompletionSection {
    pub fn undo_window(&self) -> UndoWindow {
        UndoWindow::new(Duration::from_secs(self.undo_window_secs))
    }

    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "completion.utc_offset_minutes",
                reason: format!("{} is not a valid UTC offset", self.utc_offset_minutes),
            }
        })
    }
}

impl TallyConfig {
    /// Load from `--config <path>` or `TALLY_CONFIG`, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TallyConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.event_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        if self.completion.undo_window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "completion.undo_window_secs",
                reason: "must be > 0".to_string(),
            });
        }
        self.completion.offset()?;
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
