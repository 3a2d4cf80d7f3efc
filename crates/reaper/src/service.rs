//! The reap queue: timer loop, due-entry dispatch, backoff.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    autodelete_channels::{ManagedChannel, ReapScheduler},
    autodelete_common::time::{Clock, saturating_add, until},
    autodelete_config::ReaperConfig,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tokio::{
        sync::{Notify, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use autodelete_metrics::{counter, gauge, histogram, queue as queue_metrics, reaper as reap_metrics};

/// Snapshot of the queue for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaperStatus {
    pub running: bool,
    pub pending_reaps: usize,
    pub pending_loads: usize,
    pub next_due: Option<DateTime<Utc>>,
}

struct Entry {
    due: DateTime<Utc>,
    channel: Arc<ManagedChannel>,
}

#[derive(Default)]
struct Pending {
    reaps: HashMap<String, Entry>,
    loads: HashMap<String, Entry>,
}

impl Pending {
    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.reaps.values().chain(self.loads.values()).map(|e| e.due).min()
    }
}

fn take_due(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) -> Vec<Entry> {
    let due: Vec<String> = entries
        .iter()
        .filter(|(_, e)| e.due <= now)
        .map(|(id, _)| id.clone())
        .collect();
    due.iter().filter_map(|id| entries.remove(id)).collect()
}

/// Holds at most one pending reap and one pending backlog load per channel
/// and runs each when it falls due.
pub struct ReapQueue {
    config: ReaperConfig,
    clock: Arc<dyn Clock>,
    pending: Mutex<Pending>,
    timer_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
}

impl ReapQueue {
    pub fn new(config: ReaperConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            pending: Mutex::new(Pending::default()),
            timer_handle: tokio::sync::Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the timer loop.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                return;
            }
            *running = true;
        }

        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            queue.timer_loop().await;
        });
        *self.timer_handle.lock().await = Some(handle);
        info!("reap queue started");
    }

    /// Stop the timer loop and forget every pending entry.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();

        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.abort();
        }
        {
            let mut pending = self.pending();
            pending.reaps.clear();
            pending.loads.clear();
        }
        info!("reap queue stopped");
    }

    pub async fn status(&self) -> ReaperStatus {
        let running = *self.running.read().await;
        let pending = self.pending();
        ReaperStatus {
            running,
            pending_reaps: pending.reaps.len(),
            pending_loads: pending.loads.len(),
            next_due: pending.next_due(),
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let sleep_for = self.until_next_wake();

            if !sleep_for.is_zero() {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(sleep_for) => {},
                    () = notify.notified() => {
                        debug!("reap queue woken by notify");
                        continue;
                    },
                }
            }

            if !*self.running.read().await {
                break;
            }

            self.process_due();
        }
    }

    fn until_next_wake(&self) -> Duration {
        let now = self.clock.now();
        self.pending()
            .next_due()
            .map_or(self.config.idle_poll(), |due| until(now, due))
            .min(self.config.idle_poll())
    }

    fn process_due(self: &Arc<Self>) {
        let now = self.clock.now();
        let (reaps, loads) = {
            let mut pending = self.pending();
            let reaps = take_due(&mut pending.reaps, now);
            let loads = take_due(&mut pending.loads, now);
            #[cfg(feature = "metrics")]
            {
                gauge!(queue_metrics::REAPS_PENDING).set(pending.reaps.len() as f64);
                gauge!(queue_metrics::LOADS_PENDING).set(pending.loads.len() as f64);
            }
            (reaps, loads)
        };

        for entry in loads {
            #[cfg(feature = "metrics")]
            histogram!(queue_metrics::TIMER_LATENCY_SECONDS)
                .record(until(entry.due, now).as_secs_f64());
            tokio::spawn(async move {
                entry.channel.load_backlog_now().await;
            });
        }

        for entry in reaps {
            #[cfg(feature = "metrics")]
            histogram!(queue_metrics::TIMER_LATENCY_SECONDS)
                .record(until(entry.due, now).as_secs_f64());
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_reap(entry.channel).await;
            });
        }
    }

    async fn run_reap(self: &Arc<Self>, channel: Arc<ManagedChannel>) {
        #[cfg(feature = "metrics")]
        counter!(reap_metrics::PASSES_TOTAL).increment(1);

        let collected = channel.collect_deletable();
        if collected.disabled {
            debug!(channel = %channel, "dropping disabled channel from the queue");
            return;
        }

        if !collected.ids.is_empty() {
            #[cfg(feature = "metrics")]
            histogram!(reap_metrics::BATCH_SIZE).record(collected.ids.len() as f64);
            if let Err(e) = channel.reap(collected.ids).await {
                warn!(channel = %channel, error = %e, "reap failed");
                // The collected ids already left the live-set; reload to find them again.
                if e.is_retryable() {
                    self.schedule_backlog_load(&channel, true);
                }
            }
        }

        if collected.should_resync {
            self.schedule_backlog_load(&channel, false);
        }
        if channel.is_enabled() {
            self.schedule_reap(&channel);
        }
    }
}

impl ReapScheduler for ReapQueue {
    fn schedule_reap(&self, channel: &Arc<ManagedChannel>) {
        if !channel.is_enabled() {
            self.pending().reaps.remove(channel.id());
            return;
        }
        let due = channel.next_deletion_time();
        self.pending().reaps.insert(channel.id().to_string(), Entry {
            due,
            channel: Arc::clone(channel),
        });
        self.wake_notify.notify_one();
    }

    fn cancel_reap(&self, channel_id: &str) {
        let mut pending = self.pending();
        pending.reaps.remove(channel_id);
        pending.loads.remove(channel_id);
    }

    fn schedule_backlog_load(&self, channel: &Arc<ManagedChannel>, retry: bool) {
        let delay = if retry {
            let delay =
                channel.next_load_backoff(self.config.backoff_initial(), self.config.backoff_max());
            info!(channel = %channel, delay_ms = delay.as_millis() as u64, "retrying backlog load");
            #[cfg(feature = "metrics")]
            counter!(queue_metrics::RETRIES_TOTAL).increment(1);
            delay
        } else {
            Duration::ZERO
        };
        let due = saturating_add(self.clock.now(), delay);

        {
            let mut pending = self.pending();
            match pending.loads.get_mut(channel.id()) {
                Some(entry) => entry.due = entry.due.min(due),
                None => {
                    pending.loads.insert(channel.id().to_string(), Entry {
                        due,
                        channel: Arc::clone(channel),
                    });
                },
            }
        }
        self.wake_notify.notify_one();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        autodelete_channels::{
            ChannelContext, ChannelRecord,
            testing::{FakeFailure, TestHarness, wait_until},
        },
    };

    fn config() -> ReaperConfig {
        ReaperConfig {
            backoff_initial_ms: 1_000,
            backoff_max_ms: 4_000,
            idle_poll_ms: 50,
        }
    }

    fn queue_for(h: &TestHarness) -> Arc<ReapQueue> {
        ReapQueue::new(config(), Arc::new(h.clock.clone()))
    }

    async fn channel(
        h: &TestHarness,
        queue: &Arc<ReapQueue>,
        f: impl FnOnce(&mut ChannelRecord),
    ) -> Arc<ManagedChannel> {
        let ctx = ChannelContext::new(
            h.source.clone(),
            queue.clone(),
            Arc::new(h.clock.clone()),
            h.tuning,
        )
        .with_registry(&h.registry);
        let mut record = ChannelRecord {
            guild_id: TestHarness::GUILD_ID.into(),
            ..ChannelRecord::new(h.channel_id.clone())
        };
        f(&mut record);
        let channel = ManagedChannel::init(ctx, record).await.unwrap();
        h.registry.insert(Arc::clone(&channel));
        channel
    }

    fn seed(h: &TestHarness, ids: &[&str]) {
        for (i, id) in ids.iter().enumerate() {
            h.source.post_at(&h.channel_id, id, h.ago(100 - i as i64));
        }
    }

    #[tokio::test]
    async fn test_start_stop() {
        let h = TestHarness::new();
        let queue = queue_for(&h);

        queue.start().await;
        assert!(queue.status().await.running);

        queue.stop().await;
        let status = queue.status().await;
        assert!(!status.running);
        assert_eq!(status.pending_reaps, 0);
    }

    #[tokio::test]
    async fn test_over_limit_channel_is_reaped() {
        let h = TestHarness::new();
        seed(&h, &["a", "b", "c", "d", "e"]);
        let queue = queue_for(&h);
        let ch = channel(&h, &queue, |r| r.max_messages = 2).await;
        queue.start().await;

        ch.load_backlog().await.unwrap();

        let source = Arc::clone(&h.source);
        let channel_id = h.channel_id.clone();
        wait_until(Duration::from_secs(2), move || {
            source.remaining(&channel_id).len() == 2
        })
        .await;
        assert_eq!(h.source.remaining(&h.channel_id), ["d", "e"]);
        assert_eq!(ch.live_len(), 2);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_reap_entry_waits_for_due_time() {
        let h = TestHarness::new();
        seed(&h, &["a"]);
        let queue = queue_for(&h);
        let ch = channel(&h, &queue, |r| r.live_time_secs = 3_600).await;

        ch.load_backlog().await.unwrap();

        let status = queue.status().await;
        assert_eq!(status.pending_reaps, 1);
        assert_eq!(status.next_due, Some(h.ago(100) + chrono::TimeDelta::hours(1)));
    }

    #[tokio::test]
    async fn test_disable_drops_pending_entries() {
        let h = TestHarness::new();
        seed(&h, &["a"]);
        let queue = queue_for(&h);
        let ch = channel(&h, &queue, |r| r.max_messages = 5).await;
        ch.load_backlog().await.unwrap();
        queue.schedule_backlog_load(&ch, true);

        ch.disable();

        let status = queue.status().await;
        assert_eq!(status.pending_reaps, 0);
        assert_eq!(status.pending_loads, 0);
    }

    #[tokio::test]
    async fn test_inactive_policy_is_not_queued() {
        let h = TestHarness::new();
        let queue = queue_for(&h);
        let ch = channel(&h, &queue, |_| {}).await;

        queue.schedule_reap(&ch);

        assert_eq!(queue.status().await.pending_reaps, 0);
    }

    #[tokio::test]
    async fn test_retry_uses_growing_backoff() {
        let h = TestHarness::new();
        let queue = queue_for(&h);
        let ch = channel(&h, &queue, |r| r.max_messages = 5).await;
        let start = h.now();

        queue.schedule_backlog_load(&ch, true);
        assert_eq!(
            queue.status().await.next_due,
            Some(start + chrono::TimeDelta::seconds(1))
        );

        for _ in 0..3 {
            queue.schedule_backlog_load(&ch, true);
        }
        assert_eq!(ch.load_failures(), Duration::from_secs(4));
        // The earliest pending load wins.
        assert_eq!(
            queue.status().await.next_due,
            Some(start + chrono::TimeDelta::seconds(1))
        );
    }

    #[tokio::test]
    async fn test_due_backlog_load_runs() {
        let h = TestHarness::new();
        seed(&h, &["a", "b"]);
        let queue = queue_for(&h);
        let ch = channel(&h, &queue, |r| r.max_messages = 5).await;
        queue.start().await;

        queue.schedule_backlog_load(&ch, false);

        let loaded = Arc::clone(&ch);
        wait_until(Duration::from_secs(2), move || loaded.is_ready()).await;
        assert_eq!(ch.live_len(), 2);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_failed_reap_queues_backlog_reload() {
        let h = TestHarness::new();
        seed(&h, &["a", "b", "c", "d", "e"]);
        h.source.fail_bulk_at(0, FakeFailure::Transport);
        let queue = queue_for(&h);
        let ch = channel(&h, &queue, |r| r.max_messages = 2).await;
        queue.start().await;

        ch.load_backlog().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while queue.status().await.pending_loads == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("failed reap did not queue a backlog reload");
        assert_eq!(h.source.remaining(&h.channel_id).len(), 5);
        assert_eq!(ch.load_failures(), Duration::from_secs(1));

        // Past both the retry backoff and the per-channel delete floor.
        h.clock.advance(Duration::from_secs(10));

        let source = Arc::clone(&h.source);
        let channel_id = h.channel_id.clone();
        wait_until(Duration::from_secs(2), move || {
            source.remaining(&channel_id).len() == 2
        })
        .await;
        assert_eq!(h.source.remaining(&h.channel_id), ["d", "e"]);
        assert_eq!(h.source.calls().recent, 2);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_status_serializes_camel_case() {
        let h = TestHarness::new();
        let status = ReaperStatus {
            running: true,
            pending_reaps: 2,
            pending_loads: 1,
            next_due: Some(h.now()),
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["pendingReaps"], 2);
        assert_eq!(v["pendingLoads"], 1);
        assert!(v["nextDue"].is_string());

        let back: ReaperStatus = serde_json::from_value(v).unwrap();
        assert_eq!(back, status);
    }
}
