//! Child-process implementation of [`Transfer`]

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{FetchOutcome, Result, Step, Transfer, TransferError};
use crate::config::{DestinationConfig, ToolsConfig};
use crate::job::Job;
use crate::workspace::Workspace;

/// Number of trailing output lines kept in logs
const OUTPUT_TAIL_LINES: usize = 5;

/// Program plus argument list; never passed through a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

/// Runs aria2c/rclone-style tools as child processes
#[derive(Debug, Clone)]
pub struct ProcessTransfer {
    tools: ToolsConfig,
    destination: DestinationConfig,
    workspace: Workspace,
}

impl ProcessTransfer {
    pub fn new(tools: ToolsConfig, destination: DestinationConfig, workspace: Workspace) -> Self {
        Self {
            tools,
            destination,
            workspace,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.tools.timeout.map(|t| t.as_duration())
    }

    pub(crate) fn fetch_invocation(&self, job: &Job) -> Invocation {
        let mut dir = OsString::from("--dir=");
        dir.push(self.workspace.path().as_os_str());

        Invocation {
            program: self.tools.fetch_program.clone(),
            args: vec![
                dir,
                "--seed-time=0".into(),
                "--rpc-save-upload-metadata=false".into(),
                // end of options: the link is always positional
                "--".into(),
                job.link.clone().into(),
            ],
        }
    }

    pub(crate) fn ensure_destination_invocation(&self, job: &Job) -> Invocation {
        Invocation {
            program: self.tools.publish_program.clone(),
            args: vec![
                "mkdir".into(),
                self.destination.path_for(&job.show).into(),
                "--config".into(),
                self.tools.publish_config.clone().into(),
            ],
        }
    }

    pub(crate) fn publish_invocation(&self, job: &Job) -> Invocation {
        Invocation {
            program: self.tools.publish_program.clone(),
            args: vec![
                "copy".into(),
                self.workspace.staged(&job.title).into(),
                self.destination.path_for(&job.show).into(),
                "--config".into(),
                self.tools.publish_config.clone().into(),
            ],
        }
    }

    /// Spawn, wait (bounded by the configured timeout) and return the exit status
    async fn run(&self, step: Step, invocation: Invocation) -> Result<ExitStatus> {
        debug!(
            %step,
            program = %invocation.program.display(),
            args = ?invocation.args,
            "Spawning transfer tool"
        );

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransferError::Spawn {
                step,
                program: invocation.program.clone(),
                source,
            })?;

        // Dropping the wait future drops the child, which kills it
        let waiting = child.wait_with_output();
        let output = match self.timeout() {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(output) => output,
                Err(_) => {
                    warn!(%step, after = ?limit, "Transfer tool timed out, killed");
                    return Err(TransferError::TimedOut { step, after: limit });
                }
            },
            None => waiting.await,
        }
        .map_err(|source| TransferError::Spawn {
            step,
            program: invocation.program.clone(),
            source,
        })?;

        log_output(step, &output);
        Ok(output.status)
    }

    async fn run_checked(&self, step: Step, invocation: Invocation) -> Result<()> {
        let status = self.run(step, invocation).await?;
        if status.success() {
            Ok(())
        } else {
            Err(TransferError::Failed {
                step,
                code: status.code(),
            })
        }
    }
}

#[async_trait]
impl Transfer for ProcessTransfer {
    async fn fetch(&self, job: &Job) -> Result<FetchOutcome> {
        let status = self.run(Step::Fetch, self.fetch_invocation(job)).await?;

        match status.code() {
            Some(0) => Ok(FetchOutcome::Fetched),
            Some(code) if code == self.tools.already_exists_exit_code => {
                info!(title = %job.title, code, "File already fetched, continuing");
                Ok(FetchOutcome::AlreadyPresent)
            }
            code => Err(TransferError::Failed {
                step: Step::Fetch,
                code,
            }),
        }
    }

    async fn ensure_destination(&self, job: &Job) -> Result<()> {
        self.run_checked(Step::EnsureDestination, self.ensure_destination_invocation(job))
            .await
    }

    async fn publish(&self, job: &Job) -> Result<()> {
        self.run_checked(Step::Publish, self.publish_invocation(job))
            .await
    }
}

fn log_output(step: Step, output: &Output) {
    let stdout = tail(&output.stdout);
    let stderr = tail(&output.stderr);

    if output.status.success() {
        debug!(%step, status = ?output.status.code(), %stdout, %stderr, "Transfer tool finished");
    } else {
        warn!(%step, status = ?output.status.code(), %stdout, %stderr, "Transfer tool failed");
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join(" | ")
}
