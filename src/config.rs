use anyhow::{Context, Result};
use chrono::Duration;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use crate::chain::ResumeOptions;
use crate::init::STEPCHAIN_DIR;
use crate::stepchain_config::{CONFIG_FILE_NAME, LoggingSection, StepchainToml};

/// Runtime configuration for stepchain.
///
/// Resolves the layered `stepchain.toml` (file → environment → CLI) into the
/// concrete paths and values the engine and CLI need.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub stepchain_dir: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
    pub lock_file: PathBuf,
    pub verbose: bool,
    /// The file settings after environment overrides
    pub toml: StepchainToml,
}

impl Config {
    /// Build a Config for `project_dir`.
    ///
    /// `state_file` is the CLI override and wins over both the environment and
    /// the config file.
    pub fn new(project_dir: PathBuf, verbose: bool, state_file: Option<PathBuf>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let stepchain_dir = project_dir.join(STEPCHAIN_DIR);

        let mut toml = StepchainToml::load_or_default(&stepchain_dir)?;
        toml.apply_env()?;

        let state_file = match state_file {
            Some(path) if path.is_relative() => std::env::current_dir()
                .context("Failed to resolve current directory")?
                .join(path),
            Some(path) => path,
            None => resolve_in(&stepchain_dir, &toml.state.file),
        };

        Ok(Self {
            log_dir: stepchain_dir.join("logs"),
            lock_file: stepchain_dir.join("engine.lock"),
            project_dir,
            stepchain_dir,
            state_file,
            verbose,
            toml,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.stepchain_dir.join(CONFIG_FILE_NAME)
    }

    pub fn retention(&self) -> Duration {
        Duration::days(self.toml.state.retention_days)
    }

    pub fn resume_options(&self) -> ResumeOptions {
        ResumeOptions {
            max_age: self.retention(),
            purge_abandoned: self.toml.state.purge_abandoned,
            max_concurrent: self.toml.resume.max_concurrent,
        }
    }

    pub fn command_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.toml.workers.command_timeout_secs)
    }

    pub fn logging(&self) -> &LoggingSection {
        &self.toml.logging
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.stepchain_dir)
            .context("Failed to create .stepchain directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        Ok(())
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

fn resolve_in(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
