//! Read-modify-write access to the chain state store.

use crate::store::StateStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use stepchain_common::model::now_millis;
use stepchain_common::{ChainError, ChainRecord};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The only component allowed to read-modify-write the [`StateStore`].
///
/// Every operation loads the full record set, applies its change and writes
/// the full set back. Those cycles are serialized through an internal lock so
/// that concurrent updates to different chains never overwrite each other's
/// snapshot.
pub struct ChainStateManager {
    store: Arc<dyn StateStore>,
    lock: Mutex<()>,
}

impl ChainStateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Load the full set, resetting the store if its contents are corrupt.
    ///
    /// Losing unreadable state is preferred over refusing to start forever.
    async fn read_all(&self) -> Result<Vec<ChainRecord>, ChainError> {
        match self.store.load_all().await {
            Ok(records) => Ok(records),
            Err(ChainError::StoreCorrupt(reason)) => {
                warn!(
                    store = %self.store.describe(),
                    %reason,
                    "Chain state is corrupt, resetting to empty"
                );
                self.store.reset().await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Run one locked load → mutate → save cycle.
    ///
    /// The closure returns its result and whether anything changed; unchanged
    /// sets are not written back.
    async fn modify<T, F>(&self, f: F) -> Result<T, ChainError>
    where
        F: FnOnce(&mut Vec<ChainRecord>) -> Result<(T, bool), ChainError>,
    {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let (result, changed) = f(&mut records)?;
        if changed {
            self.store.save_all(&records).await?;
        }
        Ok(result)
    }

    /// Insert or replace a record by `chain_id`.
    ///
    /// Rejects a write that would move `current_step` backwards.
    pub async fn save(&self, record: &ChainRecord) -> Result<(), ChainError> {
        self.modify(|records| {
            match records.iter_mut().find(|r| r.chain_id == record.chain_id) {
                Some(existing) => {
                    if record.current_step < existing.current_step {
                        return Err(ChainError::StepRegression {
                            chain_id: record.chain_id.clone(),
                            persisted: existing.current_step,
                            attempted: record.current_step,
                        });
                    }
                    *existing = record.clone();
                }
                None => records.push(record.clone()),
            }
            Ok(((), true))
        })
        .await?;

        debug!(
            chain_id = %record.chain_id,
            step = record.current_step,
            total_steps = record.total_steps,
            completed = record.completed,
            "Saved chain state"
        );
        Ok(())
    }

    pub async fn load(&self, chain_id: &str) -> Result<Option<ChainRecord>, ChainError> {
        let records = self.load_all().await?;
        Ok(records.into_iter().find(|r| r.chain_id == chain_id))
    }

    pub async fn load_all(&self) -> Result<Vec<ChainRecord>, ChainError> {
        let _guard = self.lock.lock().await;
        self.read_all().await
    }

    /// Records that are incomplete and were touched within `max_age`.
    pub async fn load_resumable(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Vec<ChainRecord>, ChainError> {
        let records = self.load_all().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.is_resumable(now, max_age))
            .collect())
    }

    /// Persist the completion of the chain's current step.
    pub async fn advance_step(&self, chain_id: &str) -> Result<ChainRecord, ChainError> {
        let advanced = self
            .modify(|records| {
                let record = records
                    .iter_mut()
                    .find(|r| r.chain_id == chain_id)
                    .ok_or_else(|| ChainError::not_found(chain_id))?;
                *record = record.advance_at(now_millis())?;
                Ok((record.clone(), true))
            })
            .await?;

        info!(
            chain_id,
            step = advanced.current_step,
            total_steps = advanced.total_steps,
            completed = advanced.completed,
            "Chain advanced"
        );
        Ok(advanced)
    }

    /// Force a chain into its terminal completed state.
    ///
    /// Idempotent. A missing chain is not an error; `None` is returned.
    pub async fn mark_completed(&self, chain_id: &str) -> Result<Option<ChainRecord>, ChainError> {
        let completed = self
            .modify(|records| {
                match records.iter_mut().find(|r| r.chain_id == chain_id) {
                    Some(record) => {
                        *record = record.completed_at(now_millis());
                        Ok((Some(record.clone()), true))
                    }
                    None => Ok((None, false)),
                }
            })
            .await?;

        if completed.is_none() {
            debug!(chain_id, "mark_completed on unknown chain ignored");
        }
        Ok(completed)
    }

    /// Delete a failed chain. Failed chains are never retried.
    ///
    /// Returns whether a record was removed.
    pub async fn mark_failed(&self, chain_id: &str) -> Result<bool, ChainError> {
        let removed = self
            .modify(|records| {
                let before = records.len();
                records.retain(|r| r.chain_id != chain_id);
                let removed = records.len() != before;
                Ok((removed, removed))
            })
            .await?;

        if removed {
            info!(chain_id, "Removed failed chain");
        } else {
            debug!(chain_id, "mark_failed on unknown chain ignored");
        }
        Ok(removed)
    }

    /// Remove completed records older than `max_age`.
    ///
    /// Incomplete records are kept whatever their age.
    pub async fn cleanup_expired(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<usize, ChainError> {
        let removed = self
            .modify(|records| {
                let before = records.len();
                records.retain(|r| !r.is_expired(now, max_age));
                let removed = before - records.len();
                Ok((removed, removed > 0))
            })
            .await?;

        if removed > 0 {
            info!(removed, "Cleaned up expired chains");
        }
        Ok(removed)
    }

    /// Remove incomplete records that have not been touched within `max_age`.
    ///
    /// Returns the purged records so callers can report them.
    pub async fn purge_abandoned(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Vec<ChainRecord>, ChainError> {
        let purged = self
            .modify(|records| {
                let (abandoned, kept): (Vec<_>, Vec<_>) = std::mem::take(records)
                    .into_iter()
                    .partition(|r| r.is_abandoned(now, max_age));
                *records = kept;
                let changed = !abandoned.is_empty();
                Ok((abandoned, changed))
            })
            .await?;

        for record in &purged {
            warn!(
                chain_id = %record.chain_id,
                step = record.current_step,
                total_steps = record.total_steps,
                "Purged abandoned chain"
            );
        }
        Ok(purged)
    }

    /// Drop every persisted record.
    pub async fn clear_all(&self) -> Result<(), ChainError> {
        let _guard = self.lock.lock().await;
        self.store.reset().await?;
        warn!(store = %self.store.describe(), "Cleared all chain state");
        Ok(())
    }
}
