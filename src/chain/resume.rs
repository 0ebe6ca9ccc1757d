//! Startup recovery of interrupted chains.

use super::executor::{ChainExecutor, ChainRunOutcome};
use super::manager::ChainStateManager;
use crate::events::EventSink;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use stepchain_common::{ChainError, ChainEvent, ChainRecord, default_retention};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A host-provided durable chain primitive.
///
/// When available, resumable records are handed over to it instead of being
/// executed in-process. The persisted record stays the source of truth; the
/// scheduler is expected to report progress back through the state manager.
#[async_trait]
pub trait NativeChainScheduler: Send + Sync {
    fn name(&self) -> &str;

    async fn enqueue(&self, record: &ChainRecord) -> Result<(), ChainError>;
}

/// Where resumed chains run.
#[derive(Clone, Default)]
pub enum ChainBackend {
    /// In-process executor backed by the state store.
    #[default]
    Simulated,
    Native(Arc<dyn NativeChainScheduler>),
}

#[derive(Debug, Clone)]
pub struct ResumeOptions {
    pub max_age: Duration,
    /// Also drop incomplete records that are older than `max_age`.
    pub purge_abandoned: bool,
    /// Chains resumed at once. Zero is treated as one.
    pub max_concurrent: usize,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self {
            max_age: default_retention(),
            purge_abandoned: true,
            max_concurrent: 4,
        }
    }
}

/// What startup recovery did before handing chains off.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeReport {
    pub expired_removed: usize,
    pub abandoned: Vec<String>,
    pub resumed: Vec<String>,
    pub handed_to_native: Vec<String>,
}

impl ResumeReport {
    pub fn is_empty(&self) -> bool {
        self.expired_removed == 0
            && self.abandoned.is_empty()
            && self.resumed.is_empty()
            && self.handed_to_native.is_empty()
    }
}

/// Background runs launched by [`ResumeCoordinator::start`].
pub struct ResumeHandle {
    pub report: ResumeReport,
    runs: Vec<(String, JoinHandle<Result<ChainRunOutcome, ChainError>>)>,
}

impl ResumeHandle {
    pub fn pending(&self) -> usize {
        self.runs.len()
    }

    /// Wait for every resumed chain to finish.
    pub async fn wait(self) -> Vec<Result<ChainRunOutcome, ChainError>> {
        let (ids, handles): (Vec<_>, Vec<_>) = self.runs.into_iter().unzip();
        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, chain_id)| {
                joined.unwrap_or_else(|e| {
                    Err(ChainError::Aborted {
                        chain_id,
                        reason: e.to_string(),
                    })
                })
            })
            .collect()
    }
}

/// Purge abandoned records and emit [`ChainEvent::ChainAbandoned`] for each.
///
/// Returns the purged chain ids.
pub async fn purge_abandoned_chains(
    manager: &ChainStateManager,
    events: &dyn EventSink,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<Vec<String>, ChainError> {
    let purged = manager.purge_abandoned(now, max_age).await?;
    Ok(purged
        .into_iter()
        .map(|record| {
            events.emit(ChainEvent::ChainAbandoned {
                chain_id: record.chain_id.clone(),
                current_step: record.current_step,
                total_steps: record.total_steps,
            });
            record.chain_id
        })
        .collect())
}

/// Runs once at startup, before new chains are submitted.
///
/// 1. remove expired completed records
/// 2. optionally purge abandoned incomplete records
/// 3. load resumable records
/// 4. launch each one in the background, bounded by `max_concurrent`
pub struct ResumeCoordinator {
    executor: ChainExecutor,
    events: Arc<dyn EventSink>,
    backend: ChainBackend,
    options: ResumeOptions,
}

impl ResumeCoordinator {
    pub fn new(executor: ChainExecutor, events: Arc<dyn EventSink>, options: ResumeOptions) -> Self {
        Self {
            executor,
            events,
            backend: ChainBackend::Simulated,
            options,
        }
    }

    pub fn with_backend(mut self, backend: ChainBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Recover state and launch resumption. Does not wait for chains to finish.
    pub async fn start(&self, now: DateTime<Utc>) -> Result<ResumeHandle, ChainError> {
        let manager = self.executor.manager();
        let max_age = self.options.max_age;
        let mut report = ResumeReport {
            expired_removed: manager.cleanup_expired(now, max_age).await?,
            ..ResumeReport::default()
        };

        if self.options.purge_abandoned {
            report.abandoned =
                purge_abandoned_chains(manager, self.events.as_ref(), now, max_age).await?;
        }

        let resumable = manager.load_resumable(now, max_age).await?;
        let mut runs = Vec::new();

        match &self.backend {
            ChainBackend::Native(scheduler) => {
                for record in resumable {
                    scheduler.enqueue(&record).await?;
                    info!(chain_id = %record.chain_id, scheduler = scheduler.name(), "Handed chain to native scheduler");
                    report.handed_to_native.push(record.chain_id);
                }
            }
            ChainBackend::Simulated => {
                let permits = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
                for record in resumable {
                    let chain_id = record.chain_id.clone();
                    let executor = self.executor.clone();
                    let permits = Arc::clone(&permits);
                    let handle = tokio::spawn(async move {
                        let _permit = permits.acquire_owned().await.map_err(|e| {
                            ChainError::Aborted {
                                chain_id: record.chain_id.clone(),
                                reason: e.to_string(),
                            }
                        })?;
                        let result = executor.resume(record).await;
                        if let Err(e) = &result {
                            warn!(error = %e, "Resumed chain aborted");
                        }
                        result
                    });
                    report.resumed.push(chain_id.clone());
                    runs.push((chain_id, handle));
                }
            }
        }

        info!(
            expired = report.expired_removed,
            abandoned = report.abandoned.len(),
            resumed = report.resumed.len(),
            native = report.handed_to_native.len(),
            "Resume pass finished"
        );
        Ok(ResumeHandle { report, runs })
    }
}
