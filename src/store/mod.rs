//! Durable storage for chain records.
//!
//! A [`StateStore`] persists the whole set of [`ChainRecord`]s at once. The
//! state manager always reads, mutates and writes back the full set, so a
//! store only has to make one operation atomic.
//!
//! Two implementations ship with the crate:
//!
//! - [`JsonFileStore`] - a JSON document replaced via write-then-rename
//! - [`MemoryStore`] - in-process bytes, with fault injection for tests

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use stepchain_common::{ChainError, ChainRecord};

/// Layout version written into every state document.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Crash-safe persistence of the full chain record set.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read every persisted record.
    ///
    /// Returns [`ChainError::StoreCorrupt`] if the persisted data cannot be
    /// parsed. A missing document is an empty set, not an error.
    async fn load_all(&self) -> Result<Vec<ChainRecord>, ChainError>;

    /// Replace the persisted set. Readers never observe a partial write.
    async fn save_all(&self, records: &[ChainRecord]) -> Result<(), ChainError>;

    /// Drop all persisted data, leaving the store empty.
    async fn reset(&self) -> Result<(), ChainError>;

    /// Short human-readable location, used in logs and CLI output.
    fn describe(&self) -> String;
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    #[serde(default)]
    chains: Vec<ChainRecord>,
}

/// Serialize a record set into the on-disk document format.
pub fn encode_records(records: &[ChainRecord]) -> Result<Vec<u8>, ChainError> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        version: u32,
        chains: &'a [ChainRecord],
    }

    let mut bytes = serde_json::to_vec_pretty(&Borrowed {
        version: STATE_FORMAT_VERSION,
        chains: records,
    })
    .map_err(ChainError::Serialization)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse and sanity-check a state document.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<ChainRecord>, ChainError> {
    let document: StateDocument = serde_json::from_slice(bytes)
        .map_err(|e| ChainError::StoreCorrupt(format!("unparseable state document: {}", e)))?;

    if document.version > STATE_FORMAT_VERSION {
        return Err(ChainError::StoreCorrupt(format!(
            "state document version {} is newer than supported version {}",
            document.version, STATE_FORMAT_VERSION
        )));
    }

    let mut seen = HashSet::new();
    for record in &document.chains {
        record.check_invariants().map_err(ChainError::StoreCorrupt)?;
        if !seen.insert(record.chain_id.as_str()) {
            return Err(ChainError::StoreCorrupt(format!(
                "chain {} is stored more than once",
                record.chain_id
            )));
        }
    }

    Ok(document.chains)
}
