use std::sync::Arc;

use crate::channel::ManagedChannel;

/// Scheduling queue that decides, across channels, when to reap and when to
/// (re)load backlogs.
///
/// Channels call these as side effects. Implementations must not block: the
/// calls happen on event paths and right after the state lock is released.
pub trait ReapScheduler: Send + Sync {
    /// File the channel for a reap pass at its `next_deletion_time()`.
    fn schedule_reap(&self, channel: &Arc<ManagedChannel>);

    /// Drop any pending reap or backlog load for the channel.
    fn cancel_reap(&self, channel_id: &str);

    /// Queue a backlog load. With `retry` set the load is delayed by the
    /// channel's accumulated backoff.
    fn schedule_backlog_load(&self, channel: &Arc<ManagedChannel>, retry: bool);
}
