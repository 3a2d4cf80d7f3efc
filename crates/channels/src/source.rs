//! Contract for the remote chat platform.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::error::SourceResult;

/// A message as returned by the remote source.
///
/// Only the fields retention needs are carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: String,
    /// Posting time as reported by the platform (RFC 3339).
    pub timestamp: String,
}

impl RemoteMessage {
    pub fn new(id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Parsed posting time, or `None` when the timestamp is empty, malformed,
    /// or not after the Unix epoch. Such messages are never deletion candidates.
    #[must_use]
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        parse_posted_at(&self.timestamp)
    }
}

/// Current remote view of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    /// Set when the channel has ever had a message pinned.
    pub last_pin_timestamp: Option<String>,
}

/// Remote message operations used by a managed channel.
///
/// Implementations wrap the platform's HTTP client and map its failures onto
/// [`crate::SourceError`]; a refused bulk delete of old messages must surface
/// as [`crate::SourceError::BulkDeleteTooOld`].
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Look up the channel's current name and guild.
    async fn channel_info(&self, channel_id: &str) -> SourceResult<ChannelInfo>;

    /// Fetch up to `limit` most recent messages, newest first.
    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SourceResult<Vec<RemoteMessage>>;

    /// Fetch the channel's pinned messages.
    async fn pinned_messages(&self, channel_id: &str) -> SourceResult<Vec<RemoteMessage>>;

    /// Fetch a single message.
    async fn message(&self, channel_id: &str, message_id: &str) -> SourceResult<RemoteMessage>;

    /// Delete a batch of messages in one request.
    async fn bulk_delete(&self, channel_id: &str, message_ids: &[String]) -> SourceResult<()>;

    /// Delete one message.
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> SourceResult<()>;
}

/// Parse a platform timestamp into a usable posting time.
#[must_use]
pub fn parse_posted_at(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    let utc = parsed.with_timezone(&Utc);
    (utc > DateTime::<Utc>::UNIX_EPOCH).then_some(utc)
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("2024-05-01T12:00:00.123000+00:00", true)]
    #[case("2024-05-01T14:00:00+02:00", true)]
    #[case("", false)]
    #[case("yesterday", false)]
    #[case("1970-01-01T00:00:00+00:00", false)]
    #[case("0001-01-01T00:00:00Z", false)]
    fn posted_at_parsing(#[case] raw: &str, #[case] usable: bool) {
        assert_eq!(parse_posted_at(raw).is_some(), usable);
    }

    #[test]
    fn offsets_normalize_to_utc() {
        let a = parse_posted_at("2024-05-01T14:00:00+02:00");
        let b = parse_posted_at("2024-05-01T12:00:00Z");
        assert_eq!(a, b);
    }
}
