//! Accepting new chains: validate the definition, persist the initial
//! record, then launch it in the background.

use super::executor::{ChainExecutor, ChainRunOutcome};
use stepchain_common::{ChainDefinition, ChainError, ChainRecord, generate_chain_id};
use tokio::task::JoinHandle;
use tracing::info;

/// A chain accepted for execution.
pub struct SubmittedChain {
    pub chain_id: String,
    handle: JoinHandle<Result<ChainRunOutcome, ChainError>>,
}

impl SubmittedChain {
    /// Wait for the first attempt to reach a terminal state.
    pub async fn wait(self) -> Result<ChainRunOutcome, ChainError> {
        let chain_id = self.chain_id;
        self.handle.await.unwrap_or_else(|e| {
            Err(ChainError::Aborted {
                chain_id,
                reason: e.to_string(),
            })
        })
    }
}

/// Accepts chain definitions, persists them and starts their first run.
#[derive(Clone)]
pub struct ChainSubmitter {
    executor: ChainExecutor,
}

impl ChainSubmitter {
    pub fn new(executor: ChainExecutor) -> Self {
        Self { executor }
    }

    /// Validate, persist and launch a chain.
    ///
    /// Invalid definitions are rejected before anything is written, and no
    /// chain id is handed out for them. A store failure while persisting the
    /// initial record is returned here; later failures come through
    /// [`SubmittedChain::wait`].
    pub async fn submit(&self, definition: ChainDefinition) -> Result<SubmittedChain, ChainError> {
        let record = self.prepare(definition)?;
        self.executor.manager().save(&record).await?;

        let chain_id = record.chain_id.clone();
        info!(
            %chain_id,
            total_steps = record.total_steps,
            "Chain submitted"
        );

        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.run(record).await });
        Ok(SubmittedChain { chain_id, handle })
    }

    fn prepare(&self, definition: ChainDefinition) -> Result<ChainRecord, ChainError> {
        let name = definition
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let chain_id = generate_chain_id(name);
        ChainRecord::create_initial(&chain_id, name, definition.steps)
    }
}
