//! Swarm engine seam.
//!
//! The downloader drives a [`SwarmSession`] and never touches the engine
//! directly, so the engine can be swapped for a deterministic stub in
//! tests and in builds without the `rqbit` feature.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::metainfo::TorrentMeta;

#[cfg(feature = "rqbit")]
mod native;
mod stub;

pub use stub::StubSession;

/// Alerts drained from the engine by the downloader's poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAlert {
    /// Every piece of the file at this torrent index has been verified.
    FileCompleted {
        /// Index into the torrent's file listing.
        index: usize,
    },
    /// Transfer totals for the enabled file set.
    Progress {
        /// Verified payload bytes so far.
        bytes_downloaded: u64,
        /// Total payload bytes of the enabled files.
        bytes_total: u64,
    },
    /// The session failed; no further downloads will make progress.
    SessionError {
        /// Engine-reported failure description.
        message: String,
    },
}

/// A single-torrent swarm session. Created with every file skipped;
/// files download only once [`SwarmSession::enable_files`] names them.
#[async_trait]
pub trait SwarmSession: Send {
    /// Raise the given file indexes from skip to download priority.
    /// Already-enabled indexes are accepted and ignored.
    async fn enable_files(&mut self, indexes: &[usize]) -> Result<()>;

    /// Drain pending engine alerts.
    async fn poll_alerts(&mut self) -> Result<Vec<SessionAlert>>;

    /// Tear the session down. Further calls are no-ops.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Create the swarm session for a torrent, saving payload under
/// `save_path`.
///
/// With the `rqbit` feature this opens a librqbit session; otherwise a
/// stub is returned that reports a descriptive session error, which the
/// sync surfaces through its normal download-error path.
///
/// # Errors
///
/// Returns an error if the native engine cannot be initialized.
pub async fn create_session(meta: &TorrentMeta, save_path: &Path) -> Result<Box<dyn SwarmSession>> {
    #[cfg(feature = "rqbit")]
    {
        native::create_session(meta, save_path).await
    }

    #[cfg(not(feature = "rqbit"))]
    {
        let _ = (meta, save_path);
        Ok(Box::new(StubSession::unsupported(
            "swarm engine support is not compiled in (enable the `rqbit` feature)",
        )))
    }
}
