//! Durable instance storage.
//!
//! Creation is the only deduplication point: `insert_if_absent` must be
//! atomic, so two creates for one id can never both succeed, even across
//! processes sharing a file store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::state::InstanceRecord;

#[derive(Error, Debug)]
pub enum InstanceStoreError {
    #[error("instance store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("instance record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("invalid instance id: {0:?}")]
    InvalidId(String),
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Persist a new record. `false` when the id already exists.
    async fn insert_if_absent(&self, record: &InstanceRecord) -> Result<bool, InstanceStoreError>;

    async fn load(&self, id: &str) -> Result<Option<InstanceRecord>, InstanceStoreError>;

    /// Replace an existing record.
    async fn save(&self, record: &InstanceRecord) -> Result<(), InstanceStoreError>;

    /// Every record that has not reached a terminal status.
    async fn list_running(&self) -> Result<Vec<InstanceRecord>, InstanceStoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    records: Mutex<HashMap<String, InstanceRecord>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn insert_if_absent(&self, record: &InstanceRecord) -> Result<bool, InstanceStoreError> {
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Ok(false);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn load(&self, id: &str) -> Result<Option<InstanceRecord>, InstanceStoreError> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn save(&self, record: &InstanceRecord) -> Result<(), InstanceStoreError> {
        self.records.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<InstanceRecord>, InstanceStoreError> {
        let mut running: Vec<_> = self
            .records
            .lock()
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        running.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(running)
    }
}

/// One JSON file per instance in a directory.
///
/// File names are the hex-encoded instance id, so any id maps to a plain
/// name. New files are written to a synced temp file and hard-linked into
/// place, which fails if the target exists. Updates are written the same
/// way and renamed over the old one. The directory is synced after both.
#[derive(Debug)]
pub struct FileInstanceStore {
    dir: PathBuf,
    temp_counter: AtomicU64,
}

impl FileInstanceStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, InstanceStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, InstanceStoreError> {
        Ok(self.dir.join(format!("{}.json", file_stem(id)?)))
    }

    async fn write_temp(&self, record: &InstanceRecord) -> Result<PathBuf, InstanceStoreError> {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp = self
            .dir
            .join(format!(".{}.{}.{}.tmp", file_stem(&record.id)?, std::process::id(), n));

        let json = serde_json::to_vec_pretty(record)?;
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        Ok(temp)
    }

    /// Make a completed link or rename survive power loss.
    async fn sync_dir(&self) {
        let synced = match fs::File::open(&self.dir).await {
            Ok(dir) => dir.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            tracing::debug!(dir = %self.dir.display(), error = %e, "Could not sync instance directory");
        }
    }
}

fn file_stem(id: &str) -> Result<String, InstanceStoreError> {
    if id.is_empty() {
        return Err(InstanceStoreError::InvalidId(id.to_string()));
    }
    Ok(hex::encode(id))
}

#[async_trait]
impl InstanceStore for FileInstanceStore {
    async fn insert_if_absent(&self, record: &InstanceRecord) -> Result<bool, InstanceStoreError> {
        let path = self.path_for(&record.id)?;
        let temp = self.write_temp(record).await?;

        let linked = fs::hard_link(&temp, &path).await;
        if let Err(e) = fs::remove_file(&temp).await {
            tracing::debug!(path = %temp.display(), error = %e, "Could not remove temp file");
        }

        match linked {
            Ok(()) => {
                self.sync_dir().await;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: &str) -> Result<Option<InstanceRecord>, InstanceStoreError> {
        let path = self.path_for(id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, record: &InstanceRecord) -> Result<(), InstanceStoreError> {
        let path = self.path_for(&record.id)?;
        let temp = self.write_temp(record).await?;
        fs::rename(&temp, &path).await?;
        self.sync_dir().await;
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<InstanceRecord>, InstanceStoreError> {
        let mut running = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }

            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<InstanceRecord>(&bytes) {
                Ok(record) if !record.status.is_terminal() => running.push(record),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable instance record");
                }
            }
        }

        running.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(running)
    }
}
