//! Mutable per-channel state guarded by the channel's state lock.

use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, Utc};

use crate::{live_set::LiveSet, store::ChannelRecord};

/// Age and count limits for a channel, plus its configured keep list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Messages older than this are deleted. Zero disables the age limit.
    pub live_time: Duration,
    /// At most this many candidates are kept. Zero disables the count limit.
    pub max_messages: usize,
    /// Message ids that are never deleted.
    pub keep_messages: Vec<String>,
}

impl RetentionPolicy {
    pub fn age_active(&self) -> bool {
        !self.live_time.is_zero()
    }

    pub fn count_active(&self) -> bool {
        self.max_messages > 0
    }

    pub fn is_active(&self) -> bool {
        self.age_active() || self.count_active()
    }

    /// Keep-set for a given set of pinned ids: pins plus the configured list.
    pub fn keep_set<I>(&self, pinned: I) -> HashSet<String>
    where
        I: IntoIterator<Item = String>,
    {
        pinned
            .into_iter()
            .chain(self.keep_messages.iter().cloned())
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct ChannelState {
    pub policy: RetentionPolicy,
    pub last_sent_update: i64,
    pub is_donor: bool,
    pub needs_export: bool,

    pub live: LiveSet,
    /// The channel is not due for deletion before this time.
    pub min_next_delete: DateTime<Utc>,
    /// Last backlog load attempt.
    pub last_backlog_load: Option<DateTime<Utc>>,
    /// Accumulated retry delay after failed backlog loads.
    pub load_failures: Duration,

    /// Set once by `disable()`; the reaper drops the channel when it sees it.
    pub killed: bool,
}

impl ChannelState {
    pub fn new(policy: RetentionPolicy, now: DateTime<Utc>) -> Self {
        Self {
            policy,
            last_sent_update: 0,
            is_donor: false,
            needs_export: false,
            live: LiveSet::default(),
            min_next_delete: now,
            last_backlog_load: None,
            load_failures: Duration::ZERO,
            killed: false,
        }
    }

    pub fn from_record(record: &ChannelRecord, now: DateTime<Utc>) -> Self {
        let mut state = Self::new(record.policy(), now);
        state.last_sent_update = record.last_sent_update;
        state.is_donor = record.is_donor;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_activity() {
        let mut policy = RetentionPolicy::default();
        assert!(!policy.is_active());
        policy.max_messages = 5;
        assert!(policy.count_active() && !policy.age_active() && policy.is_active());
        policy.max_messages = 0;
        policy.live_time = Duration::from_secs(60);
        assert!(policy.age_active() && policy.is_active());
    }

    #[test]
    fn keep_set_unions_pins_and_config() {
        let policy = RetentionPolicy {
            keep_messages: vec!["cfg".into(), "both".into()],
            ..Default::default()
        };
        let keep = policy.keep_set(["pin".to_string(), "both".to_string()]);
        assert_eq!(keep.len(), 3);
        assert!(keep.contains("cfg") && keep.contains("pin") && keep.contains("both"));
    }
}
