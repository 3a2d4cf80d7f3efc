//! In-memory doubles for the remote source and the scheduler, plus a small
//! harness wiring them to a manual clock.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    async_trait::async_trait,
    autodelete_common::time::{Clock, ManualClock},
    autodelete_config::RetentionTuning,
    chrono::{DateTime, TimeDelta, Utc},
};

use crate::{
    channel::{ChannelContext, ManagedChannel},
    error::{SourceError, SourceResult},
    registry::ChannelRegistry,
    scheduler::ReapScheduler,
    source::{ChannelInfo, MessageSource, RemoteMessage},
    store::ChannelRecord,
};

/// Failure a [`FakeSource`] can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    TooOld,
    RateLimited,
    Forbidden,
    NotFound,
    Transport,
}

impl FakeFailure {
    fn to_error(self, what: &str) -> SourceError {
        match self {
            Self::TooOld => SourceError::BulkDeleteTooOld,
            Self::RateLimited => SourceError::RateLimited { retry_after: None },
            Self::Forbidden => SourceError::forbidden(format!("no access to {what}")),
            Self::NotFound => SourceError::not_found(what),
            Self::Transport => SourceError::transport(
                what,
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
            ),
        }
    }
}

/// Calls a [`FakeSource`] has served.
#[derive(Debug, Clone, Default)]
pub struct SourceCalls {
    pub channel_info: usize,
    pub recent: usize,
    pub pinned: usize,
    pub message: usize,
    /// Id batches, one entry per bulk request.
    pub bulk: Vec<Vec<String>>,
    /// Ids passed to single deletes, in order.
    pub single: Vec<String>,
}

struct FakeChannel {
    info: ChannelInfo,
    /// Oldest first.
    messages: Vec<RemoteMessage>,
    pins: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    channels: HashMap<String, FakeChannel>,
    calls: SourceCalls,
    history_failures: Option<(usize, FakeFailure)>,
    pin_failures: Option<(usize, FakeFailure)>,
    bulk_failures: HashMap<usize, FakeFailure>,
    single_failures: HashSet<String>,
    history_delay: Duration,
}

impl FakeState {
    fn channel(&mut self, channel_id: &str) -> &mut FakeChannel {
        self.channels
            .entry(channel_id.to_string())
            .or_insert_with(|| FakeChannel {
                info: ChannelInfo {
                    id: channel_id.to_string(),
                    guild_id: String::new(),
                    name: channel_id.to_string(),
                    last_pin_timestamp: None,
                },
                messages: Vec::new(),
                pins: Vec::new(),
            })
    }

    fn next_failure(scripted: &mut Option<(usize, FakeFailure)>) -> Option<FakeFailure> {
        match scripted.as_mut() {
            Some((times, failure)) if *times > 0 => {
                *times -= 1;
                Some(*failure)
            },
            _ => None,
        }
    }

    fn existing(&self, channel_id: &str) -> SourceResult<&FakeChannel> {
        self.channels
            .get(channel_id)
            .ok_or_else(|| SourceError::not_found(format!("channel {channel_id}")))
    }
}

/// A chat platform held in memory.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<FakeState>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_channel(&self, channel_id: &str, guild_id: &str, name: &str) {
        let mut st = self.lock();
        let channel = st.channel(channel_id);
        channel.info.guild_id = guild_id.to_string();
        channel.info.name = name.to_string();
    }

    pub fn post_at(&self, channel_id: &str, message_id: &str, at: DateTime<Utc>) {
        self.post_raw(channel_id, message_id, &at.to_rfc3339());
    }

    pub fn post_raw(&self, channel_id: &str, message_id: &str, timestamp: &str) {
        self.lock()
            .channel(channel_id)
            .messages
            .push(RemoteMessage::new(message_id, timestamp));
    }

    pub fn pin(&self, channel_id: &str, message_id: &str) {
        let mut st = self.lock();
        let channel = st.channel(channel_id);
        channel.pins.push(message_id.to_string());
        channel.info.last_pin_timestamp = Some(Utc::now().to_rfc3339());
    }

    pub fn unpin(&self, channel_id: &str, message_id: &str) {
        self.lock().channel(channel_id).pins.retain(|id| id != message_id);
    }

    /// Delete a message behind the channel's back.
    pub fn remove(&self, channel_id: &str, message_id: &str) {
        self.lock()
            .channel(channel_id)
            .messages
            .retain(|m| m.id != message_id);
    }

    /// Ids still present remotely, oldest first.
    pub fn remaining(&self, channel_id: &str) -> Vec<String> {
        self.lock()
            .channel(channel_id)
            .messages
            .iter()
            .map(|m| m.id.clone())
            .collect()
    }

    /// Fail the next `times` history fetches.
    pub fn fail_history(&self, times: usize, failure: FakeFailure) {
        self.lock().history_failures = Some((times, failure));
    }

    /// Fail the next `times` pinned-message fetches.
    pub fn fail_pins(&self, times: usize, failure: FakeFailure) {
        self.lock().pin_failures = Some((times, failure));
    }

    /// Fail the bulk request with this zero-based index.
    pub fn fail_bulk_at(&self, index: usize, failure: FakeFailure) {
        self.lock().bulk_failures.insert(index, failure);
    }

    pub fn fail_single(&self, message_id: &str) {
        self.lock().single_failures.insert(message_id.to_string());
    }

    /// Hold every history fetch for this long.
    pub fn set_history_delay(&self, delay: Duration) {
        self.lock().history_delay = delay;
    }

    pub fn calls(&self) -> SourceCalls {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn channel_info(&self, channel_id: &str) -> SourceResult<ChannelInfo> {
        let mut st = self.lock();
        st.calls.channel_info += 1;
        Ok(st.existing(channel_id)?.info.clone())
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SourceResult<Vec<RemoteMessage>> {
        let (result, delay) = {
            let mut st = self.lock();
            st.calls.recent += 1;
            let failure = FakeState::next_failure(&mut st.history_failures);
            let result: SourceResult<Vec<RemoteMessage>> = match failure {
                Some(failure) => Err(failure.to_error(channel_id)),
                None => st.existing(channel_id).map(|channel| {
                    channel.messages.iter().rev().take(limit).cloned().collect()
                }),
            };
            (result, st.history_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn pinned_messages(&self, channel_id: &str) -> SourceResult<Vec<RemoteMessage>> {
        let mut st = self.lock();
        st.calls.pinned += 1;
        if let Some(failure) = FakeState::next_failure(&mut st.pin_failures) {
            return Err(failure.to_error(channel_id));
        }
        let channel = st.existing(channel_id)?;
        Ok(channel
            .pins
            .iter()
            .map(|id| {
                let timestamp = channel
                    .messages
                    .iter()
                    .find(|m| &m.id == id)
                    .map(|m| m.timestamp.clone())
                    .unwrap_or_default();
                RemoteMessage::new(id.clone(), timestamp)
            })
            .collect())
    }

    async fn message(&self, channel_id: &str, message_id: &str) -> SourceResult<RemoteMessage> {
        let mut st = self.lock();
        st.calls.message += 1;
        st.existing(channel_id)?
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| SourceError::not_found(format!("message {message_id}")))
    }

    async fn bulk_delete(&self, channel_id: &str, message_ids: &[String]) -> SourceResult<()> {
        let mut st = self.lock();
        let index = st.calls.bulk.len();
        st.calls.bulk.push(message_ids.to_vec());
        if let Some(failure) = st.bulk_failures.remove(&index) {
            return Err(failure.to_error(channel_id));
        }
        st.channel(channel_id)
            .messages
            .retain(|m| !message_ids.contains(&m.id));
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> SourceResult<()> {
        let mut st = self.lock();
        st.calls.single.push(message_id.to_string());
        if st.single_failures.contains(message_id) {
            return Err(FakeFailure::Transport.to_error(message_id));
        }
        let messages = &mut st.channel(channel_id).messages;
        let before = messages.len();
        messages.retain(|m| m.id != message_id);
        if messages.len() == before {
            return Err(SourceError::not_found(format!("message {message_id}")));
        }
        Ok(())
    }
}

/// A scheduler call seen by [`RecordingScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Reap { channel_id: String },
    Cancel { channel_id: String },
    BacklogLoad { channel_id: String, retry: bool },
}

impl SchedulerEvent {
    pub fn reap(channel_id: &str) -> Self {
        Self::Reap {
            channel_id: channel_id.to_string(),
        }
    }

    pub fn cancel(channel_id: &str) -> Self {
        Self::Cancel {
            channel_id: channel_id.to_string(),
        }
    }

    pub fn load(channel_id: &str) -> Self {
        Self::BacklogLoad {
            channel_id: channel_id.to_string(),
            retry: false,
        }
    }

    pub fn retry(channel_id: &str) -> Self {
        Self::BacklogLoad {
            channel_id: channel_id.to_string(),
            retry: true,
        }
    }
}

/// Scheduler that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingScheduler {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SchedulerEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl ReapScheduler for RecordingScheduler {
    fn schedule_reap(&self, channel: &Arc<ManagedChannel>) {
        self.lock().push(SchedulerEvent::reap(channel.id()));
    }

    fn cancel_reap(&self, channel_id: &str) {
        self.lock().push(SchedulerEvent::cancel(channel_id));
    }

    fn schedule_backlog_load(&self, channel: &Arc<ManagedChannel>, retry: bool) {
        self.lock().push(SchedulerEvent::BacklogLoad {
            channel_id: channel.id().to_string(),
            retry,
        });
    }
}

/// A fake platform with one channel (`"100"` in guild `"1"`), a recording
/// scheduler, a registry, and a clock that only moves when advanced.
pub struct TestHarness {
    pub source: Arc<FakeSource>,
    pub scheduler: Arc<RecordingScheduler>,
    pub clock: ManualClock,
    pub registry: Arc<ChannelRegistry>,
    pub tuning: RetentionTuning,
    pub channel_id: String,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub const GUILD_ID: &str = "1";

    pub fn new() -> Self {
        let source = Arc::new(FakeSource::new());
        source.add_channel("100", Self::GUILD_ID, "general");
        Self {
            source,
            scheduler: Arc::new(RecordingScheduler::new()),
            // 2024-06-01T12:00:00Z
            clock: ManualClock::new(DateTime::from_timestamp(1_717_243_200, 0).unwrap_or_default()),
            registry: Arc::new(ChannelRegistry::new()),
            tuning: RetentionTuning::default(),
            channel_id: "100".into(),
        }
    }

    pub fn context(&self) -> ChannelContext {
        ChannelContext::new(
            self.source.clone(),
            self.scheduler.clone(),
            Arc::new(self.clock.clone()),
            self.tuning,
        )
        .with_registry(&self.registry)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// `secs` seconds before the clock's current time.
    pub fn ago(&self, secs: i64) -> DateTime<Utc> {
        self.clock.now() - TimeDelta::seconds(secs)
    }

    /// Initialise and register the harness channel.
    pub async fn channel_with(&self, f: impl FnOnce(&mut ChannelRecord)) -> Arc<ManagedChannel> {
        let channel_id = self.channel_id.clone();
        self.channel_for(&channel_id, f).await
    }

    pub async fn channel_for(
        &self,
        channel_id: &str,
        f: impl FnOnce(&mut ChannelRecord),
    ) -> Arc<ManagedChannel> {
        let mut record = ChannelRecord {
            guild_id: Self::GUILD_ID.into(),
            ..ChannelRecord::new(channel_id)
        };
        f(&mut record);
        match ManagedChannel::init(self.context(), record).await {
            Ok(channel) => {
                self.registry.insert(Arc::clone(&channel));
                channel
            },
            Err(e) => panic!("test channel {channel_id} failed to initialise: {e}"),
        }
    }
}

/// Poll `done` until it holds, panicking after `timeout`.
pub async fn wait_until(timeout: Duration, done: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !done() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
