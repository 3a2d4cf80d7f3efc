//! The managed channel: identity, policy, and the state lock around the
//! live-set.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use {
    autodelete_common::time::Clock,
    autodelete_config::RetentionTuning,
    chrono::{DateTime, Utc},
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use autodelete_metrics::{channels as ch_metrics, counter};

use crate::{
    Error, Result,
    evaluator::Collected,
    gate::ReadinessGate,
    live_set::LiveMessage,
    registry::ChannelRegistry,
    scheduler::ReapScheduler,
    source::MessageSource,
    state::{ChannelState, RetentionPolicy},
    store::ChannelRecord,
};

/// Collaborators shared by every managed channel.
#[derive(Clone)]
pub struct ChannelContext {
    pub source: Arc<dyn MessageSource>,
    pub scheduler: Arc<dyn ReapScheduler>,
    /// Registry the channel removes itself from on disable.
    pub registry: Weak<ChannelRegistry>,
    pub clock: Arc<dyn Clock>,
    pub tuning: RetentionTuning,
}

impl ChannelContext {
    pub fn new(
        source: Arc<dyn MessageSource>,
        scheduler: Arc<dyn ReapScheduler>,
        clock: Arc<dyn Clock>,
        tuning: RetentionTuning,
    ) -> Self {
        Self {
            source,
            scheduler,
            registry: Weak::new(),
            clock,
            tuning,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: &Arc<ChannelRegistry>) -> Self {
        self.registry = Arc::downgrade(registry);
        self
    }
}

/// All retention state for one chat channel.
pub struct ManagedChannel {
    channel_id: String,
    guild_id: String,
    name: String,

    pub(crate) ctx: ChannelContext,
    /// Never held across an `.await`.
    state: Mutex<ChannelState>,
    /// Serializes backlog loads; held across remote fetches.
    pub(crate) backlog_lock: tokio::sync::Mutex<()>,
    /// Opens when the first backlog load completes.
    pub(crate) ready: ReadinessGate,
}

impl ManagedChannel {
    /// Build a channel from its persisted record.
    ///
    /// The channel's current name and guild are looked up remotely; a failed
    /// lookup is a configuration error and the channel is never activated.
    pub async fn init(ctx: ChannelContext, record: ChannelRecord) -> Result<Arc<Self>> {
        let info = ctx
            .source
            .channel_info(&record.id)
            .await
            .map_err(|e| Error::channel_lookup(&record.id, e))?;

        let mut state = ChannelState::from_record(&record, ctx.clock.now());
        if info.guild_id != record.guild_id {
            debug!(
                channel_id = %info.id,
                stored = %record.guild_id,
                current = %info.guild_id,
                "guild id changed, channel needs export"
            );
            state.needs_export = true;
        }

        Ok(Arc::new(Self {
            channel_id: info.id,
            guild_id: info.guild_id,
            name: info.name,
            ctx,
            state: Mutex::new(state),
            backlog_lock: tokio::sync::Mutex::new(()),
            ready: ReadinessGate::new(),
        }))
    }

    /// An identifier-only instance, enough to run [`ManagedChannel::disable`]
    /// for a channel that is not (or no longer) loaded.
    pub fn placeholder(ctx: ChannelContext, channel_id: impl Into<String>) -> Arc<Self> {
        let now = ctx.clock.now();
        Arc::new(Self {
            channel_id: channel_id.into(),
            guild_id: String::new(),
            name: String::new(),
            ctx,
            state: Mutex::new(ChannelState::new(RetentionPolicy::default(), now)),
            backlog_lock: tokio::sync::Mutex::new(()),
            ready: ReadinessGate::new(),
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    pub fn id(&self) -> &str {
        &self.channel_id
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Policy ──────────────────────────────────────────────────────────

    pub fn policy(&self) -> RetentionPolicy {
        self.state().policy.clone()
    }

    pub fn set_live_time(&self, live_time: Duration) {
        let mut st = self.state();
        st.policy.live_time = live_time;
        st.needs_export = true;
    }

    pub fn set_max_messages(&self, max_messages: usize) {
        let mut st = self.state();
        st.policy.max_messages = max_messages;
        st.needs_export = true;
    }

    /// Replace the configured keep list. Takes effect in the keep-set on the
    /// next backlog load or pin update.
    pub fn set_keep_messages(&self, keep_messages: Vec<String>) {
        let mut st = self.state();
        st.policy.keep_messages = keep_messages;
        st.needs_export = true;
    }

    pub fn last_sent_update(&self) -> i64 {
        self.state().last_sent_update
    }

    pub fn mark_update_sent(&self, version: i64) {
        let mut st = self.state();
        if version > st.last_sent_update {
            st.last_sent_update = version;
            st.needs_export = true;
        }
    }

    pub fn is_donor(&self) -> bool {
        self.state().is_donor
    }

    pub fn set_donor(&self, is_donor: bool) {
        let mut st = self.state();
        if st.is_donor != is_donor {
            st.is_donor = is_donor;
            st.needs_export = true;
        }
    }

    /// Not disabled, and at least one of the age or count limits is set.
    pub fn is_enabled(&self) -> bool {
        let st = self.state();
        !st.killed && st.policy.is_active()
    }

    /// The first backlog load has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Current configuration as a persistable record (no live-set).
    pub fn export(&self) -> ChannelRecord {
        let st = self.state();
        ChannelRecord {
            id: self.channel_id.clone(),
            guild_id: self.guild_id.clone(),
            live_time_secs: st.policy.live_time.as_secs(),
            max_messages: st.policy.max_messages,
            last_sent_update: st.last_sent_update,
            keep_messages: st.policy.keep_messages.clone(),
            is_donor: st.is_donor,
        }
    }

    pub fn needs_export(&self) -> bool {
        self.state().needs_export
    }

    pub fn clear_needs_export(&self) {
        self.state().needs_export = false;
    }

    // ── Inspection ──────────────────────────────────────────────────────

    pub fn live_len(&self) -> usize {
        self.state().live.len()
    }

    pub fn keep_len(&self) -> usize {
        self.state().live.keep_len()
    }

    pub fn is_kept(&self, message_id: &str) -> bool {
        self.state().live.is_kept(message_id)
    }

    /// Copy of the live-set, oldest first.
    pub fn live_snapshot(&self) -> Vec<LiveMessage> {
        self.state().live.iter().cloned().collect()
    }

    // ── Retention evaluation ────────────────────────────────────────────

    /// When this channel next has something to delete.
    ///
    /// Returns the idle horizon (far future) when nothing is pending.
    pub fn next_deletion_time(&self) -> DateTime<Utc> {
        let now = self.now();
        self.state().next_deletion_time(now, &self.ctx.tuning)
    }

    /// Remove and return the messages that must be deleted right now.
    ///
    /// Call immediately before a deletion pass; the popped entries are gone
    /// from the live-set whether or not the deletion succeeds.
    pub fn collect_deletable(&self) -> Collected {
        let now = self.now();
        let collected = self.state().collect_deletable(now, &self.ctx.tuning);
        if !collected.ids.is_empty() {
            debug!(
                channel = %self,
                count = collected.ids.len(),
                should_resync = collected.should_resync,
                "collected messages for deletion"
            );
        }
        collected
    }

    /// Grow and return the retry delay after a failed backlog load.
    pub fn next_load_backoff(&self, initial: Duration, max: Duration) -> Duration {
        let mut st = self.state();
        st.load_failures = if st.load_failures.is_zero() {
            initial
        } else {
            st.load_failures.saturating_mul(2)
        }
        .min(max);
        st.load_failures
    }

    pub fn load_failures(&self) -> Duration {
        self.state().load_failures
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Remove this channel from the registry, the reap queue, and release
    /// its state.
    ///
    /// Safe on a [`ManagedChannel::placeholder`] and safe to repeat. If the
    /// registry held a different instance for the same id, that instance is
    /// shut down too.
    pub fn disable(self: &Arc<Self>) {
        // First: nothing new can be dispatched to us.
        if let Some(registry) = self.ctx.registry.upgrade()
            && let Some(existing) = registry.remove(&self.channel_id)
            && !Arc::ptr_eq(&existing, self)
        {
            existing.kill();
        }

        let first = self.kill();

        self.ctx.scheduler.cancel_reap(&self.channel_id);

        if first {
            info!(channel = %self, "channel disabled");
            #[cfg(feature = "metrics")]
            counter!(ch_metrics::DISABLED_TOTAL).increment(1);
        }
    }

    /// Clear state and set the kill flag. Returns whether this call set it.
    fn kill(&self) -> bool {
        let was_killed = {
            let mut st = self.state();
            st.live.clear();
            std::mem::replace(&mut st.killed, true)
        };
        // Release anyone parked on the gate; they observe the flag and bail.
        self.ready.open();
        !was_killed
    }

    pub fn is_disabled(&self) -> bool {
        self.state().killed
    }
}

impl fmt::Display for ManagedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.channel_id, self.name)
    }
}

impl fmt::Debug for ManagedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedChannel")
            .field("channel_id", &self.channel_id)
            .field("guild_id", &self.guild_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
