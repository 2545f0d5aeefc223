//! Consume loop: one delivery at a time until shutdown or cancellation

use std::future::Future;
use tracing::{error, info, warn};

use super::controller::{Disposition, JobController};
use crate::queue::{MessageSource, QueueError};

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown signal received while idle
    Shutdown,
    /// Consumer cancelled by the broker, e.g. the inbound queue was deleted
    ConsumerCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub stop: StopReason,
}

/// Pull deliveries and process each to its disposition before asking for the
/// next one.
///
/// `shutdown` is only polled while waiting for a delivery, so an in-flight job
/// always settles. Gateway errors end the loop.
pub async fn run<S, F>(
    source: &mut S,
    controller: &JobController,
    shutdown: F,
) -> Result<RunSummary, QueueError>
where
    S: MessageSource + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut processed = 0u64;

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => {
                info!(processed, "Shutdown requested, stopping consumer");
                return Ok(RunSummary { processed, stop: StopReason::Shutdown });
            }
            next = source.next_message() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                error!(error = %e, "Failed to receive message");
                return Err(e);
            }
            None => {
                error!("Inbound queue has been deleted or the consumer was cancelled");
                return Ok(RunSummary {
                    processed,
                    stop: StopReason::ConsumerCancelled,
                });
            }
        };

        let disposition = controller.process(message).await?;
        processed += 1;

        match disposition {
            Disposition::Completed(job) => info!(title = %job.title, "Job completed"),
            Disposition::Requeued(e) => warn!(error = %e, "Job requeued"),
            Disposition::Dropped(e) => warn!(error = %e, "Job dropped"),
        }
    }
}
