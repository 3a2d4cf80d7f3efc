//! JSON file-backed channel store with atomic writes.

use std::path::PathBuf;

use {async_trait::async_trait, tokio::fs};

use crate::{
    Context, Error, Result,
    store::{ChannelRecord, ChannelStore},
};

/// File-backed store. All records in a single JSON array.
pub struct FileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a store at the location named by the storage config.
    pub fn from_config(storage: &autodelete_config::StorageConfig) -> Self {
        Self::new(storage.resolved_channels_path())
    }

    async fn read_all(&self) -> Result<Vec<ChannelRecord>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path).await?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    /// Atomic write: write to temp, rename over target, keep `.bak`.
    async fn write_all(&self, records: &[ChannelRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, json.as_bytes()).await?;

        if fs::try_exists(&self.path).await.unwrap_or(false) {
            let bak = self.path.with_extension("json.bak");
            let _ = fs::rename(&self.path, &bak).await;
        }

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for FileStore {
    async fn list(&self) -> Result<Vec<ChannelRecord>> {
        self.read_all().await
    }

    async fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|r| r.id == channel_id))
    }

    async fn upsert(&self, record: ChannelRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        if let Some(pos) = records.iter().position(|r| r.id == record.id) {
            records[pos] = record;
        } else {
            records.push(record);
        }
        self.write_all(&records).await
    }

    async fn delete(&self, channel_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|r| r.id != channel_id);
        if records.len() == before {
            return Err(Error::message(format!("channel not found: {channel_id}")));
        }
        self.write_all(&records).await
    }
}
