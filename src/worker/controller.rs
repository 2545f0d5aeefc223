//! Job lifecycle: one delivery from receipt to ack/nack
//!
//! ```text
//! Received → Normalized → Fetched → (DestinationReady) → Published → Acked → Notified → Done
//!     └──────────┴────────────┴────────────┴──→ Failed → Cleaned → Requeued | Dropped
//! ```
//!
//! A message is acknowledged only after every transfer step succeeded, and the
//! staging directory is cleared exactly once on every path.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::job::{Job, Normalizer, ParseError};
use crate::observability::Metrics;
use crate::queue::{InboundMessage, NoticePublisher, QueueError};
use crate::transfer::{FetchOutcome, Transfer, TransferError};
use crate::workspace::Workspace;

/// Why a job did not complete
#[derive(Debug, Error)]
pub enum JobError {
    #[error("payload rejected: {0}")]
    Parse(#[from] ParseError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

impl JobError {
    /// Transfer failures may succeed on redelivery; parse failures never will
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transfer(_))
    }
}

/// Whether a failed delivery goes back to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    pub transfer_failures: bool,
    pub parse_failures: bool,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            transfer_failures: true,
            parse_failures: false,
        }
    }
}

impl From<RetryConfig> for RequeuePolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            transfer_failures: config.requeue_transfer_failures,
            parse_failures: config.requeue_parse_failures,
        }
    }
}

impl RequeuePolicy {
    pub fn requeue(&self, error: &JobError) -> bool {
        match error {
            JobError::Transfer(_) => self.transfer_failures,
            JobError::Parse(_) => self.parse_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Normalized,
    Fetched,
    DestinationReady,
    Published,
    Acked,
    Notified,
    Done,
    Failed,
    Cleaned,
    Requeued,
    Dropped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Received => "received",
            JobState::Normalized => "normalized",
            JobState::Fetched => "fetched",
            JobState::DestinationReady => "destination-ready",
            JobState::Published => "published",
            JobState::Acked => "acked",
            JobState::Notified => "notified",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cleaned => "cleaned",
            JobState::Requeued => "requeued",
            JobState::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of one delivery
#[derive(Debug)]
pub enum Disposition {
    /// Acked and announced downstream
    Completed(Job),
    /// Nacked with requeue
    Requeued(JobError),
    /// Nacked without requeue (dropped or dead-lettered by the broker)
    Dropped(JobError),
}

/// Drives a single delivery through the job lifecycle
#[derive(bon::Builder)]
pub struct JobController {
    normalizer: Normalizer,
    transfer: Arc<dyn Transfer>,
    workspace: Workspace,
    publisher: Arc<dyn NoticePublisher>,
    #[builder(default)]
    policy: RequeuePolicy,
    /// Run the optional destination `mkdir` step before publishing
    #[builder(default)]
    ensure_destination: bool,
    #[builder(default)]
    metrics: Arc<Metrics>,
}

impl JobController {
    pub fn policy(&self) -> RequeuePolicy {
        self.policy
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Process one delivery to its disposition.
    ///
    /// Job failures become a nack and are returned as a [`Disposition`]. Only
    /// gateway failures (ack, nack or notice publish) are returned as errors;
    /// staging has been cleared by then as well.
    pub async fn process(&self, message: InboundMessage) -> Result<Disposition, QueueError> {
        let delivery = message.id();
        self.metrics.job_received();
        info!(
            %delivery,
            redelivered = message.redelivered(),
            size = message.payload().len(),
            "Message received"
        );
        transition(delivery, JobState::Received);

        let outcome = self.execute(delivery, message.payload()).await;
        match outcome {
            Ok(job) => self.complete(delivery, message, job).await,
            Err(error) => self.fail(delivery, message, error).await,
        }
    }

    async fn execute(&self, delivery: Uuid, payload: &[u8]) -> Result<Job, JobError> {
        let job = self.normalizer.normalize(payload)?;
        info!(%delivery, title = %job.title, show = %job.show, "Job normalized");
        transition(delivery, JobState::Normalized);

        info!(%delivery, title = %job.title, "Downloading");
        match self.transfer.fetch(&job).await? {
            FetchOutcome::Fetched => info!(%delivery, "Downloaded"),
            FetchOutcome::AlreadyPresent => {
                warn!(%delivery, title = %job.title, "Download already present, continuing")
            }
        }
        transition(delivery, JobState::Fetched);

        if self.ensure_destination {
            self.transfer.ensure_destination(&job).await?;
            transition(delivery, JobState::DestinationReady);
        }

        info!(%delivery, show = %job.show, "Uploading");
        self.transfer.publish(&job).await?;
        info!(%delivery, "Uploaded");
        transition(delivery, JobState::Published);

        Ok(job)
    }

    async fn complete(
        &self,
        delivery: Uuid,
        message: InboundMessage,
        job: Job,
    ) -> Result<Disposition, QueueError> {
        let acked = message.ack().await;
        self.clear_staging(delivery).await;

        if let Err(e) = acked {
            error!(%delivery, title = %job.title, error = %e, "Failed to ack message");
            return Err(e);
        }
        transition(delivery, JobState::Acked);

        if let Err(e) = self.publisher.publish(&job).await {
            error!(
                %delivery,
                title = %job.title,
                error = %e,
                "Failed to publish notice for acknowledged job"
            );
            return Err(e);
        }
        self.metrics.notice_published();
        transition(delivery, JobState::Notified);

        self.metrics.job_completed();
        info!(%delivery, title = %job.title, "Published");
        transition(delivery, JobState::Done);

        Ok(Disposition::Completed(job))
    }

    async fn fail(
        &self,
        delivery: Uuid,
        message: InboundMessage,
        error: JobError,
    ) -> Result<Disposition, QueueError> {
        error!(%delivery, error = %error, transient = error.is_transient(), "Job failed");
        transition(delivery, JobState::Failed);

        self.clear_staging(delivery).await;
        transition(delivery, JobState::Cleaned);

        let requeue = self.policy.requeue(&error);
        if let Err(e) = message.nack(requeue).await {
            error!(%delivery, requeue, error = %e, "Failed to nack message");
            return Err(e);
        }

        if requeue {
            self.metrics.job_requeued();
            info!(%delivery, "Message nacked, requeued");
            transition(delivery, JobState::Requeued);
            Ok(Disposition::Requeued(error))
        } else {
            self.metrics.job_dropped();
            warn!(%delivery, "Message nacked without requeue");
            transition(delivery, JobState::Dropped);
            Ok(Disposition::Dropped(error))
        }
    }

    async fn clear_staging(&self, delivery: Uuid) {
        debug!(%delivery, path = %self.workspace.path().display(), "Emptying staging directory");
        self.workspace.clear().await;
        self.metrics.staging_cleared();
    }
}

fn transition(delivery: Uuid, state: JobState) {
    debug!(%delivery, %state, "Job state");
}
