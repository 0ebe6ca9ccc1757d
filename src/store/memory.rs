use super::{StateStore, decode_records, encode_records};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use stepchain_common::{ChainError, ChainRecord};

/// In-process store that keeps the encoded document in memory.
///
/// Records go through the same encode/decode path as the file store, so
/// corruption handling and round-trips behave identically. Writes can be
/// made to fail on demand to exercise I/O error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from raw document bytes, e.g. corrupt data.
    pub fn with_raw(bytes: impl Into<Vec<u8>>) -> Self {
        let store = Self::default();
        *store.lock() = Some(bytes.into());
        store
    }

    /// Start from an already-persisted set of records.
    pub fn with_records(records: &[ChainRecord]) -> Result<Self, ChainError> {
        Ok(Self::with_raw(encode_records(records)?))
    }

    pub fn raw(&self) -> Option<Vec<u8>> {
        self.lock().clone()
    }

    /// Make every subsequent `save_all` fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `save_all` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        // The guarded data is plain bytes, so a poisoned lock is still usable.
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<ChainRecord>, ChainError> {
        match self.lock().as_deref() {
            Some(bytes) => decode_records(bytes),
            None => Ok(Vec::new()),
        }
    }

    async fn save_all(&self, records: &[ChainRecord]) -> Result<(), ChainError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChainError::StoreIo(std::io::Error::other(
                "simulated write failure",
            )));
        }
        let bytes = encode_records(records)?;
        *self.lock() = Some(bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reset(&self) -> Result<(), ChainError> {
        *self.lock() = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
