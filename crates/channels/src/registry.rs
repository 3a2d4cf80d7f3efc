use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use {
    tokio::task::JoinSet,
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use autodelete_metrics::{channels as ch_metrics, gauge};

use crate::{
    Error, Result,
    channel::{ChannelContext, ManagedChannel},
    store::ChannelStore,
};

/// Every managed channel, keyed by channel id.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<ManagedChannel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ManagedChannel>>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ManagedChannel>>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a channel, returning the instance it replaced.
    pub fn insert(&self, channel: Arc<ManagedChannel>) -> Option<Arc<ManagedChannel>> {
        let mut channels = self.write();
        let previous = channels.insert(channel.id().to_string(), channel);
        #[cfg(feature = "metrics")]
        gauge!(ch_metrics::ACTIVE).set(channels.len() as f64);
        previous
    }

    pub fn remove(&self, channel_id: &str) -> Option<Arc<ManagedChannel>> {
        let mut channels = self.write();
        let removed = channels.remove(channel_id);
        #[cfg(feature = "metrics")]
        gauge!(ch_metrics::ACTIVE).set(channels.len() as f64);
        removed
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<ManagedChannel>> {
        self.read().get(channel_id).cloned()
    }

    /// All channels, in no particular order.
    pub fn snapshot(&self) -> Vec<Arc<ManagedChannel>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Build and register a channel for every stored record.
    ///
    /// Channels whose lookup fails are skipped and returned alongside their
    /// error. Each loaded channel gets a backlog load queued.
    pub async fn load_from_store(
        self: &Arc<Self>,
        store: &dyn ChannelStore,
        ctx: &ChannelContext,
    ) -> Result<Vec<(String, Error)>> {
        let records = store.list().await?;
        let total = records.len();
        let mut failed = Vec::new();

        for record in records {
            let channel_id = record.id.clone();
            match ManagedChannel::init(ctx.clone().with_registry(self), record).await {
                Ok(channel) => {
                    self.insert(Arc::clone(&channel));
                    ctx.scheduler.schedule_backlog_load(&channel, false);
                },
                Err(e) => {
                    warn!(channel_id = %channel_id, error = %e, "could not load channel");
                    failed.push((channel_id, e));
                },
            }
        }

        info!(loaded = total - failed.len(), failed = failed.len(), "channels loaded");
        Ok(failed)
    }

    /// Load the backlog of every registered channel concurrently.
    pub async fn load_all_backlogs(&self) {
        let mut tasks = JoinSet::new();
        for channel in self.snapshot() {
            tasks.spawn(async move { channel.load_backlog_now().await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "backlog load task failed");
            }
        }
    }

    /// Persist every channel whose configuration changed since the last
    /// export. Returns how many records were written.
    pub async fn export_dirty(&self, store: &dyn ChannelStore) -> Result<usize> {
        let mut written = 0;
        for channel in self.snapshot() {
            if !channel.needs_export() {
                continue;
            }
            store.upsert(channel.export()).await?;
            channel.clear_needs_export();
            written += 1;
        }
        Ok(written)
    }
}
