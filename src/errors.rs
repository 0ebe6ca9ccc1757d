//! Typed error hierarchy for the runtime side of stepchain.
//!
//! Chain-state errors live in `stepchain_common::ChainError`. This module adds:
//! - `WorkerError`: a worker could not run its task
//! - `EngineError`: the engine could not be opened or operated

use std::path::PathBuf;
use stepchain_common::ChainError;
use thiserror::Error;

/// Errors from a single worker invocation.
///
/// The registry turns every one of these into a failed task outcome; they
/// never abort a chain run directly.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Unknown worker kind '{0}'")]
    UnknownKind(String),

    #[error("Invalid worker config: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("Command workers are disabled")]
    CommandDisabled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from opening or driving the chain engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Another stepchain process holds the lock at {path}")]
    Locked { path: PathBuf },

    #[error("Project is not initialized (missing {path}); run `stepchain init`")]
    NotInitialized { path: PathBuf },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
