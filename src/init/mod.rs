//! Project initialization and the single-process engine lock.
//!
//! `stepchain init` creates the `.stepchain/` directory:
//!
//! ```text
//! .stepchain/
//! ├── stepchain.toml   # Configuration (defaults, commented)
//! ├── chains.json      # Persisted chain records (created on first write)
//! ├── engine.lock      # Held while an engine is open
//! └── logs/            # Daily rolling log files
//! ```

use crate::errors::EngineError;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// The name of the stepchain project directory.
pub const STEPCHAIN_DIR: &str = ".stepchain";

/// Written by `init` and `config init`; mirrors the built-in defaults.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# stepchain configuration

[state]
# Relative paths resolve against .stepchain/
file = "chains.json"
# Completed chains older than this are removed at startup
retention_days = 7
# Also remove incomplete chains untouched for longer than retention_days
purge_abandoned = true

[resume]
enabled = true
max_concurrent = 4

[workers]
command_enabled = true
command_timeout_secs = 300

[logging]
level = "info"
json = false
file = true
"#;

/// Result of initializing a stepchain project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .stepchain directory
    pub stepchain_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize a stepchain project in the given directory.
///
/// Existing files are never overwritten, so running it twice is harmless.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let stepchain_dir = project_dir.join(STEPCHAIN_DIR);
    let created = !stepchain_dir.exists();

    std::fs::create_dir_all(&stepchain_dir)
        .with_context(|| format!("Failed to create directory: {}", stepchain_dir.display()))?;

    let logs_dir = stepchain_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;

    write_default_config(&stepchain_dir, false)?;

    Ok(InitResult {
        stepchain_dir,
        created,
    })
}

/// Write the default `stepchain.toml`. Returns false if one exists and
/// `overwrite` is not set.
pub fn write_default_config(stepchain_dir: &Path, overwrite: bool) -> Result<bool> {
    let config_file = stepchain_dir.join(crate::stepchain_config::CONFIG_FILE_NAME);
    if config_file.exists() && !overwrite {
        return Ok(false);
    }
    std::fs::write(&config_file, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write config file: {}", config_file.display()))?;
    Ok(true)
}

/// Check if a project is already initialized with stepchain.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(STEPCHAIN_DIR).is_dir()
}

/// Exclusive advisory lock on `.stepchain/engine.lock`.
///
/// Two processes resuming the same store would run every interrupted chain
/// twice. The lock is released when this value is dropped.
#[derive(Debug)]
pub struct EngineLock {
    path: PathBuf,
    _file: File,
}

impl EngineLock {
    /// Try to take the lock without blocking.
    pub fn acquire(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self {
                path: path.to_path_buf(),
                _file: file,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(EngineError::Locked {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to lock {}", path.display()))
                .into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
