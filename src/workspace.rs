//! Staging directory shared by the fetch and publish steps

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Transient directory holding the fetched file until it is published.
///
/// Only one job uses it at a time (prefetch 1), so no locking is needed;
/// it is wiped at the end of every job instead.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Location of a fetched file or directory
    pub fn staged(&self, title: &str) -> PathBuf {
        self.root.join(title)
    }

    /// Remove the staging directory recursively.
    ///
    /// Never fails: a missing directory is already clean and any other error
    /// is logged, since a failed clear must not hold up message disposition.
    /// Returns whether the directory is gone afterwards.
    pub async fn clear(&self) -> bool {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!(path = %self.root.display(), "Staging directory cleared");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.root.display(), "Staging directory already absent");
                true
            }
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "Failed to clear staging directory");
                false
            }
        }
    }
}
