//! Configuration file support for stepchain.
//!
//! Settings live in `.stepchain/stepchain.toml` and are layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [state]
//! file = "chains.json"      # relative paths resolve against .stepchain/
//! retention_days = 7
//! purge_abandoned = true
//!
//! [resume]
//! enabled = true
//! max_concurrent = 4
//!
//! [workers]
//! command_enabled = true
//! command_timeout_secs = 300
//!
//! [logging]
//! level = "info"
//! json = false
//! file = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stepchain_common::DEFAULT_RETENTION_DAYS;

pub const CONFIG_FILE_NAME: &str = "stepchain.toml";

/// Environment override for the state file location.
pub const ENV_STATE_FILE: &str = "STEPCHAIN_STATE_FILE";
/// Environment override for `state.retention_days`.
pub const ENV_RETENTION_DAYS: &str = "STEPCHAIN_RETENTION_DAYS";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Serializes tests that touch process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Where chain state lives and how long it is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSection {
    #[serde(default = "default_state_file")]
    pub file: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Remove incomplete chains untouched for longer than the retention window
    #[serde(default = "default_true")]
    pub purge_abandoned: bool,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("chains.json")
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

fn default_true() -> bool {
    true
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            file: default_state_file(),
            retention_days: default_retention_days(),
            purge_abandoned: true,
        }
    }
}

/// Startup resumption of interrupted chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for ResumeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersSection {
    /// Allow the `command` worker to spawn processes
    #[serde(default = "default_true")]
    pub command_enabled: bool,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout_secs() -> u64 {
    crate::workers::DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            command_enabled: true,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter level when `STEPCHAIN_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines on stderr instead of the compact format
    #[serde(default)]
    pub json: bool,
    /// Also write a daily log file under `.stepchain/logs/`
    #[serde(default = "default_true")]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: true,
        }
    }
}

/// The complete stepchain.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepchainToml {
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub resume: ResumeSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl StepchainToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stepchain.toml")
    }

    /// Load `stepchain.toml` from `stepchain_dir`, or defaults if it is missing.
    pub fn load_or_default(stepchain_dir: &Path) -> Result<Self> {
        let config_path = stepchain_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize stepchain.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides in place.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(file) = std::env::var(ENV_STATE_FILE)
            && !file.trim().is_empty()
        {
            self.state.file = PathBuf::from(file);
        }
        if let Ok(days) = std::env::var(ENV_RETENTION_DAYS) {
            self.state.retention_days = days
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of days", ENV_RETENTION_DAYS))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.state.retention_days < 0 {
            warnings.push(format!(
                "retention_days is negative ({}); every record will be treated as stale",
                self.state.retention_days
            ));
        } else if self.state.retention_days == 0 {
            warnings.push(
                "retention_days = 0: completed chains are removed and interrupted chains are \
                 not resumed on the next start"
                    .to_string(),
            );
        }

        if self.resume.max_concurrent == 0 {
            warnings.push("resume.max_concurrent = 0 is treated as 1".to_string());
        }

        if self.workers.command_timeout_secs == 0 {
            warnings.push("workers.command_timeout_secs = 0: every command will time out".to_string());
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            warnings.push(format!(
                "Unknown logging.level '{}'. Valid values: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        warnings
    }
}
