use std::time::Duration;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{Result, state::RetentionPolicy};

/// A persisted channel configuration.
///
/// Carries policy only; the live-set is always rebuilt from the remote
/// history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub id: String,
    #[serde(default)]
    pub guild_id: String,
    /// Message lifetime in seconds, 0 when age-based deletion is off.
    #[serde(default)]
    pub live_time_secs: u64,
    /// Live message cap, 0 when count-based deletion is off.
    #[serde(default)]
    pub max_messages: usize,
    /// Last announcement version delivered to this channel.
    #[serde(default)]
    pub last_sent_update: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keep_messages: Vec<String>,
    #[serde(default)]
    pub is_donor: bool,
}

impl ChannelRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            live_time: Duration::from_secs(self.live_time_secs),
            max_messages: self.max_messages,
            keep_messages: self.keep_messages.clone(),
        }
    }
}

/// Persistent storage for channel configurations.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ChannelRecord>>;
    async fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>>;
    async fn upsert(&self, record: ChannelRecord) -> Result<()>;
    async fn delete(&self, channel_id: &str) -> Result<()>;
}
