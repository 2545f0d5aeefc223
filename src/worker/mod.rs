//! Download-and-republish worker
//!
//! [`controller`] owns the per-job state machine, [`runner`] feeds it one
//! delivery at a time.

pub mod controller;
pub mod runner;

pub use controller::{Disposition, JobController, JobError, JobState, RequeuePolicy};
pub use runner::{RunSummary, StopReason, run};
