//! Metric name and label definitions.
//!
//! Centralizing these definitions keeps names consistent between the crates
//! that record them and the dashboards that read them.

/// Managed channel metrics
pub mod channels {
    /// Number of channels currently in the registry
    pub const ACTIVE: &str = "autodelete_channels_active";
    /// Channels disabled (explicitly or by a configuration error)
    pub const DISABLED_TOTAL: &str = "autodelete_channels_disabled_total";
    /// New messages appended to a live-set
    pub const MESSAGES_TRACKED_TOTAL: &str = "autodelete_channel_messages_tracked_total";
    /// Messages released from the keep-set back into the live-set
    pub const KEEP_RELEASED_TOTAL: &str = "autodelete_channel_keep_released_total";
}

/// Backlog synchronization metrics
pub mod backlog {
    /// Completed backlog loads
    pub const LOADS_TOTAL: &str = "autodelete_backlog_loads_total";
    /// Backlog loads skipped by the debounce window
    pub const DEBOUNCED_TOTAL: &str = "autodelete_backlog_debounced_total";
    /// Backlog loads that failed on a remote fetch
    pub const FAILURES_TOTAL: &str = "autodelete_backlog_failures_total";
    /// Messages skipped because their timestamp could not be used
    pub const UNPARSEABLE_TOTAL: &str = "autodelete_backlog_unparseable_total";
}

/// Deletion metrics
pub mod reaper {
    /// Reap passes run by the queue
    pub const PASSES_TOTAL: &str = "autodelete_reap_passes_total";
    /// Messages confirmed deleted
    pub const MESSAGES_DELETED_TOTAL: &str = "autodelete_messages_deleted_total";
    /// Bulk delete requests issued
    pub const BULK_REQUESTS_TOTAL: &str = "autodelete_bulk_delete_requests_total";
    /// Single delete requests issued by the fallback path
    pub const SINGLE_REQUESTS_TOTAL: &str = "autodelete_single_delete_requests_total";
    /// Bulk deletes refused because a message was too old
    pub const BULK_TOO_OLD_TOTAL: &str = "autodelete_bulk_delete_too_old_total";
    /// Reap passes aborted by a remote error
    pub const ERRORS_TOTAL: &str = "autodelete_reap_errors_total";
    /// Messages collected per pass
    pub const BATCH_SIZE: &str = "autodelete_reap_batch_size";
}

/// Scheduling queue metrics
pub mod queue {
    /// Channels waiting for a reap pass
    pub const REAPS_PENDING: &str = "autodelete_queue_reaps_pending";
    /// Channels waiting for a backlog load
    pub const LOADS_PENDING: &str = "autodelete_queue_loads_pending";
    /// Backlog retries scheduled with backoff
    pub const RETRIES_TOTAL: &str = "autodelete_queue_retries_total";
    /// Delay between an entry's due time and the start of its work
    pub const TIMER_LATENCY_SECONDS: &str = "autodelete_queue_timer_latency_seconds";
}

/// Standard histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Reap batch sizes, 1 to a full backlog window and beyond
    pub static BATCH_SIZE: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]
    });

    /// Timer latency in seconds, 1ms to 1 minute
    pub static TIMER_LATENCY: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]
    });
}
