pub mod config;
pub mod humanize;
pub mod job;
pub mod observability;
pub mod queue;
pub mod transfer;
pub mod worker;
pub mod workspace;
