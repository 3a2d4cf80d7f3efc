//! Backlog synchronization: rebuild the live-set from the remote history.

use std::sync::Arc;

use {
    autodelete_common::time::saturating_add,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use autodelete_metrics::{backlog as backlog_metrics, counter};

use crate::{
    Result,
    channel::ManagedChannel,
    error::SourceResult,
    live_set::LiveMessage,
    source::RemoteMessage,
};

impl ManagedChannel {
    /// Fetch the most recent history window and the pins, then replace the
    /// live-set and keep-set.
    ///
    /// Loads are serialized per channel. A load that starts within the
    /// debounce window of the previous attempt is skipped. A failed fetch
    /// leaves the current state untouched and is returned to the caller.
    pub async fn load_backlog(self: &Arc<Self>) -> Result<()> {
        let _guard = self.backlog_lock.lock().await;

        {
            let now = self.now();
            let mut st = self.state();
            if st.killed {
                return Ok(());
            }
            let recent = st
                .last_backlog_load
                .is_some_and(|last| saturating_add(last, self.ctx.tuning.backlog_debounce()) > now);
            st.last_backlog_load = Some(now);
            if recent {
                drop(st);
                warn!(channel = %self, "skipping backlog load, previous one just finished");
                #[cfg(feature = "metrics")]
                counter!(backlog_metrics::DEBOUNCED_TOTAL).increment(1);
                return Ok(());
            }
        }

        let fetched = self.fetch_backlog().await;

        let (live, keep, first) = {
            let now = self.now();
            let mut st = self.state();
            st.last_backlog_load = Some(now);

            let (messages, pins) = match fetched {
                Ok(fetched) => fetched,
                Err(e) => {
                    drop(st);
                    warn!(channel = %self, error = %e, "could not load backlog");
                    #[cfg(feature = "metrics")]
                    counter!(backlog_metrics::FAILURES_TOTAL).increment(1);
                    return Err(e.into());
                },
            };
            if st.killed {
                return Ok(());
            }

            let keep = st.policy.keep_set(pins.into_iter().map(|m| m.id));
            let fetched_len = messages.len();
            let candidates: Vec<LiveMessage> = messages
                .into_iter()
                .filter_map(|m| m.posted_at().map(|at| LiveMessage::new(m.id, at)))
                .collect();
            let skipped = fetched_len - candidates.len();
            if skipped > 0 {
                debug!(channel = %self, skipped, "ignoring messages with unusable timestamps");
                #[cfg(feature = "metrics")]
                counter!(backlog_metrics::UNPARSEABLE_TOTAL).increment(skipped as u64);
            }

            st.live.rebuild(candidates, keep);
            st.load_failures = std::time::Duration::ZERO;
            (st.live.len(), st.live.keep_len(), self.ready.open())
        };

        info!(
            channel = %self,
            live,
            keep,
            "{}",
            if first { "backlog loaded" } else { "backlog reloaded" }
        );
        #[cfg(feature = "metrics")]
        counter!(backlog_metrics::LOADS_TOTAL).increment(1);

        self.ctx.scheduler.schedule_reap(self);
        Ok(())
    }

    /// Run [`ManagedChannel::load_backlog`] and route failures: transient
    /// ones go back to the scheduler as a retry, the rest are logged.
    pub async fn load_backlog_now(self: &Arc<Self>) {
        match self.load_backlog().await {
            Ok(()) => {},
            Err(e) if e.is_retryable() => {
                self.ctx.scheduler.schedule_backlog_load(self, true);
            },
            Err(e) => {
                error!(channel = %self, error = %e, "backlog load failed, not retrying");
            },
        }
    }

    async fn fetch_backlog(&self) -> SourceResult<(Vec<RemoteMessage>, Vec<RemoteMessage>)> {
        let messages = self
            .ctx
            .source
            .recent_messages(self.id(), self.ctx.tuning.backlog_window)
            .await?;
        let pins = self.fetch_pins_if_any().await?;
        Ok((messages, pins))
    }

    /// Pins, skipping the request when the channel has never had one.
    async fn fetch_pins_if_any(&self) -> SourceResult<Vec<RemoteMessage>> {
        let info = self.ctx.source.channel_info(self.id()).await?;
        if info.last_pin_timestamp.is_none() {
            return Ok(Vec::new());
        }
        self.ctx.source.pinned_messages(self.id()).await
    }
}
