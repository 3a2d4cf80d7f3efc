//! In-memory store for testing.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use crate::{
    Error, Result,
    store::{ChannelRecord, ChannelStore},
};

/// In-memory store backed by a `HashMap`. Nothing is persisted.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, ChannelRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ChannelRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }
}

#[async_trait]
impl ChannelStore for InMemoryStore {
    async fn list(&self) -> Result<Vec<ChannelRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<ChannelRecord> = records.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(channel_id).cloned())
    }

    async fn upsert(&self, record: ChannelRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, channel_id: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.remove(channel_id).is_none() {
            return Err(Error::message(format!("channel not found: {channel_id}")));
        }
        Ok(())
    }
}
