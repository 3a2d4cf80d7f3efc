//! Deletion executor.

use std::sync::Arc;

use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use autodelete_metrics::{counter, reaper as reap_metrics};

use crate::{
    Result,
    channel::ManagedChannel,
    error::{Error, SourceError},
};

/// What a [`ManagedChannel::reap`] call did before returning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Messages removed by bulk requests.
    pub deleted: usize,
    /// Messages handed to the background single-delete path.
    pub detached: usize,
}

impl ManagedChannel {
    /// Delete `ids` remotely in bulk batches.
    ///
    /// If the platform refuses a batch because a message is too old for bulk
    /// deletion, every id from that batch on is deleted one at a time in a
    /// background task, after which a backlog reload is queued. Any other
    /// error aborts the pass and reports how many were already deleted.
    pub async fn reap(self: &Arc<Self>, ids: Vec<String>) -> Result<ReapReport> {
        let batch_size = self.ctx.tuning.bulk_delete_batch.max(1);
        let mut report = ReapReport::default();
        let mut rest = ids.as_slice();

        while !rest.is_empty() {
            let (batch, tail) = rest.split_at(batch_size.min(rest.len()));
            #[cfg(feature = "metrics")]
            counter!(reap_metrics::BULK_REQUESTS_TOTAL).increment(1);

            match self.ctx.source.bulk_delete(self.id(), batch).await {
                Ok(()) => {
                    report.deleted += batch.len();
                    rest = tail;
                },
                Err(SourceError::BulkDeleteTooOld) => {
                    #[cfg(feature = "metrics")]
                    counter!(reap_metrics::BULK_TOO_OLD_TOTAL).increment(1);
                    info!(
                        channel = %self,
                        remaining = rest.len(),
                        "bulk delete refused for old messages, deleting one by one"
                    );
                    report.detached = rest.len();
                    self.spawn_single_deletes(rest.to_vec());
                    break;
                },
                Err(source) => {
                    #[cfg(feature = "metrics")]
                    {
                        counter!(reap_metrics::ERRORS_TOTAL).increment(1);
                        counter!(reap_metrics::MESSAGES_DELETED_TOTAL)
                            .increment(report.deleted as u64);
                    }
                    return Err(Error::PartialReap {
                        deleted: report.deleted,
                        source,
                    });
                },
            }
        }

        #[cfg(feature = "metrics")]
        counter!(reap_metrics::MESSAGES_DELETED_TOTAL).increment(report.deleted as u64);
        if report.deleted > 0 {
            debug!(channel = %self, deleted = report.deleted, "bulk delete done");
        }
        Ok(report)
    }

    fn spawn_single_deletes(self: &Arc<Self>, ids: Vec<String>) {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            let mut deleted = 0usize;
            for id in &ids {
                #[cfg(feature = "metrics")]
                counter!(reap_metrics::SINGLE_REQUESTS_TOTAL).increment(1);
                match channel.ctx.source.delete_message(channel.id(), id).await {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        warn!(channel = %channel, message_id = %id, error = %e, "single delete failed");
                    },
                }
            }
            #[cfg(feature = "metrics")]
            counter!(reap_metrics::MESSAGES_DELETED_TOTAL).increment(deleted as u64);
            info!(channel = %channel, deleted, total = ids.len(), "single deletes finished");

            // The window may have held more old messages than we saw.
            channel.ctx.scheduler.schedule_backlog_load(&channel, true);
        });
    }
}
