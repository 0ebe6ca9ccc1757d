//! Typed error hierarchy for chain state and persistence.

use thiserror::Error;

/// Errors raised by chain model transitions, the state manager and stores.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Invalid chain definition: {0}")]
    InvalidChainDefinition(String),

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: String },

    #[error("Chain {chain_id} is already completed")]
    AlreadyCompleted { chain_id: String },

    #[error("Chain {chain_id} step {step_index} failed: {message}")]
    StepTaskFailure {
        chain_id: String,
        step_index: usize,
        message: String,
    },

    #[error(
        "Refusing to move chain {chain_id} back from step {persisted} to step {attempted}"
    )]
    StepRegression {
        chain_id: String,
        persisted: usize,
        attempted: usize,
    },

    #[error("Chain state store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error("Chain state store I/O failed: {0}")]
    StoreIo(#[source] std::io::Error),

    #[error("Failed to serialize chain state: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Chain run for {chain_id} was aborted: {reason}")]
    Aborted { chain_id: String, reason: String },
}

impl ChainError {
    pub fn not_found(chain_id: &str) -> Self {
        Self::ChainNotFound {
            chain_id: chain_id.to_string(),
        }
    }

    /// True for errors that mean durable state may have diverged from memory.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::StoreIo(_) | Self::StoreCorrupt(_) | Self::Serialization(_)
        )
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreIo(err)
    }
}
