//! Delegated transfer steps
//!
//! Fetching and publishing are done by external tools (aria2c and rclone by
//! default). Each step is one child process; its exit status is the only
//! success signal.

mod process;

pub use process::ProcessTransfer;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::job::Job;

/// Which delegated operation an invocation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fetch,
    EnsureDestination,
    Publish,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Fetch => "fetch",
            Step::EnsureDestination => "ensure-destination",
            Step::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{step}: failed to run {}: {source}", .program.display())]
    Spawn {
        step: Step,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{step}: {}", describe_exit(.code))]
    Failed { step: Step, code: Option<i32> },

    #[error("{step}: timed out after {after:?}")]
    TimedOut { step: Step, after: Duration },
}

impl TransferError {
    pub fn step(&self) -> Step {
        match self {
            TransferError::Spawn { step, .. }
            | TransferError::Failed { step, .. }
            | TransferError::TimedOut { step, .. } => *step,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {}", code),
        None => "terminated by signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;

/// Successful fetch results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched,
    /// The tool reported the file as already present (redelivery after a lost ack)
    AlreadyPresent,
}

/// Fetch / destination / publish operations for one job
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Retrieve `job.link` into the staging directory
    async fn fetch(&self, job: &Job) -> Result<FetchOutcome>;

    /// Create the destination collection before copying
    async fn ensure_destination(&self, job: &Job) -> Result<()>;

    /// Copy the staged file to the destination collection
    async fn publish(&self, job: &Job) -> Result<()>;
}
