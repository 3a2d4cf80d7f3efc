//! Inbound chat events: new messages, pin changes, manual exemptions.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use autodelete_metrics::{channels as ch_metrics, counter};

use crate::{Result, channel::ManagedChannel};

impl ManagedChannel {
    /// Track a message that was just posted.
    ///
    /// Waits until the first backlog load has completed. Kept ids are
    /// ignored. The message is stamped with the current time. A reap is
    /// scheduled when the live-set was empty or the append pushed it past the
    /// count limit.
    pub async fn on_new_message(self: &Arc<Self>, message_id: &str) {
        self.ready.wait().await;

        let needs_reap = {
            let now = self.now();
            let mut st = self.state();
            if st.killed || st.live.is_kept(message_id) {
                return;
            }
            let was_empty = st.live.is_empty();
            let crosses_limit =
                st.policy.count_active() && st.live.len() == st.policy.max_messages;
            st.live.push(message_id, now);
            was_empty || crosses_limit
        };

        #[cfg(feature = "metrics")]
        counter!(ch_metrics::MESSAGES_TRACKED_TOTAL).increment(1);

        if needs_reap {
            self.ctx.scheduler.schedule_reap(self);
        }
    }

    /// Re-read the pins and swap the keep-set.
    ///
    /// Messages that dropped out of the keep-set are looked up again and
    /// re-enter the live-set as if newly posted; ids that no longer resolve,
    /// or that are still in the live-set, are skipped.
    pub async fn on_pins_changed(self: &Arc<Self>) -> Result<()> {
        let pins = match self.ctx.source.pinned_messages(self.id()).await {
            Ok(pins) => pins,
            Err(e) => {
                warn!(channel = %self, error = %e, "could not load pins");
                return Err(e.into());
            },
        };

        let released = {
            let mut st = self.state();
            if st.killed {
                return Ok(());
            }
            let keep = st.policy.keep_set(pins.into_iter().map(|m| m.id));
            let mut released = st.live.replace_keep(keep);
            // Pinned mid-set entries were never popped.
            released.retain(|id| !st.live.contains(id));
            released
        };

        if !released.is_empty() {
            info!(channel = %self, released = released.len(), "messages released from keep-set");
            #[cfg(feature = "metrics")]
            counter!(ch_metrics::KEEP_RELEASED_TOTAL).increment(released.len() as u64);
        }

        for id in released {
            match self.ctx.source.message(self.id(), &id).await {
                Ok(message) => self.on_new_message(&message.id).await,
                Err(e) => debug!(channel = %self, message_id = %id, error = %e, "released message is gone"),
            }
        }
        Ok(())
    }

    /// Stop tracking one message so it is never deleted.
    ///
    /// Returns `false` (and logs) when the id is not in the live-set.
    pub fn exempt_from_deletion(&self, message_id: &str) -> bool {
        if self.state().live.remove(message_id).is_some() {
            return true;
        }
        error!(channel = %self, message_id, "exempted message is not tracked");
        false
    }
}
