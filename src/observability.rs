//! Logging setup and job counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber; `RUST_LOG` overrides the `info` default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Counters for job dispositions and cleanup
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_received: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_requeued: AtomicU64,
    jobs_dropped: AtomicU64,
    staging_cleared: AtomicU64,
    notices_published: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_received(&self) {
        self.jobs_received.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_received", "Metric incremented");
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", "Metric incremented");
    }

    pub fn job_requeued(&self) {
        self.jobs_requeued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_requeued", "Metric incremented");
    }

    pub fn job_dropped(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_dropped", "Metric incremented");
    }

    pub fn staging_cleared(&self) {
        self.staging_cleared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notice_published(&self) {
        self.notices_published.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "notices_published", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_received: self.jobs_received.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_requeued: self.jobs_requeued.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            staging_cleared: self.staging_cleared.load(Ordering::Relaxed),
            notices_published: self.notices_published.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub jobs_received: u64,
    pub jobs_completed: u64,
    pub jobs_requeued: u64,
    pub jobs_dropped: u64,
    pub staging_cleared: u64,
    pub notices_published: u64,
}
