//! Opaque keyed configuration persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, VenueError};

#[async_trait]
pub trait ConfStore: Send + Sync {
    /// Load the record stored under `key`.
    ///
    /// Returns [`VenueError::NotFound`] when nothing is stored.
    async fn load(&self, key: &str) -> Result<Vec<u8>>;

    async fn store(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// In-memory store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryConfStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryConfStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfStore for MemoryConfStore {
    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        self.records
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| VenueError::NotFound(key.to_string()))
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        self.records.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// One `<key>.json` file per record inside a directory.
#[derive(Debug, Clone)]
pub struct FileConfStore {
    dir: PathBuf,
}

impl FileConfStore {
    /// Use `dir` as the record directory, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(VenueError::Rejected(format!("invalid record key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl ConfStore for FileConfStore {
    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VenueError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        // Write-then-rename so a crash never leaves a truncated record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "config record stored");
        Ok(())
    }
}
