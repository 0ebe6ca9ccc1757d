use super::{StateStore, decode_records, encode_records};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stepchain_common::{ChainError, ChainRecord};
use tokio::io::AsyncWriteExt;

/// Chain records stored as a single JSON document on disk.
///
/// Writes go to a sibling `.tmp` file which is flushed, synced and then
/// renamed over the real file, so a crash mid-write leaves the previous
/// document intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "chains.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<ChainRecord>, ChainError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => decode_records(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ChainError::StoreIo(e)),
        }
    }

    async fn save_all(&self, records: &[ChainRecord]) -> Result<(), ChainError> {
        let bytes = encode_records(records)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path();
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await?;
        tracing::trace!(path = %self.path.display(), records = records.len(), "Persisted chain state");
        Ok(())
    }

    async fn reset(&self) -> Result<(), ChainError> {
        for path in [self.path.clone(), self.temp_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ChainError::StoreIo(e)),
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
