//! Download coordinator wrapping the swarm session.
//!
//! A background worker owns the session, drains its alerts on a fixed
//! cadence, and translates them into per-file events for the sync loop.
//! Requests and events cross the task boundary by value.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metainfo::TorrentMeta;
use crate::session::{SessionAlert, SwarmSession};

const ALERT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Progress alerts arrive at the poll cadence; log lines are throttled
/// to this interval.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(2);
const COMMAND_BUFFER: usize = 64;

/// Progress events emitted by the downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// A requested file finished downloading and verified all its pieces.
    Completed {
        /// Torrent path of the completed file.
        path: String,
    },
    /// The session failed; no further downloads will complete.
    Failed {
        /// Engine-reported failure description.
        message: String,
    },
}

enum DownloaderCommand {
    Download(Vec<String>),
    Stop,
}

/// Handle to the torrent download worker.
pub struct TorrentDownloader {
    commands: mpsc::Sender<DownloaderCommand>,
    meta: TorrentMeta,
}

impl TorrentDownloader {
    /// Spawn the download worker over an already-created session and
    /// return the handle plus the progress event stream.
    #[must_use]
    pub fn start(
        meta: TorrentMeta,
        session: Box<dyn SwarmSession>,
    ) -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            meta: meta.clone(),
            session,
            events: event_tx,
            requested: HashSet::new(),
            downloaded: HashSet::new(),
            errored: false,
            last_progress_log: None,
        };
        tokio::spawn(worker.run(command_rx));
        (Self { commands, meta }, event_rx)
    }

    /// The parsed torrent metadata backing this downloader.
    #[must_use]
    pub fn metainfo(&self) -> &TorrentMeta {
        &self.meta
    }

    /// Request downloads for the given torrent paths. Duplicates are
    /// idempotent; paths the torrent does not name are silently ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has already terminated.
    pub async fn download_files(&self, paths: Vec<String>) -> Result<()> {
        self.commands
            .send(DownloaderCommand::Download(paths))
            .await
            .map_err(|_| anyhow!("download worker is no longer running"))
    }

    /// Stop the worker and tear the session down.
    pub async fn stop(&self) {
        let _ = self.commands.send(DownloaderCommand::Stop).await;
    }
}

struct Worker {
    meta: TorrentMeta,
    session: Box<dyn SwarmSession>,
    events: mpsc::UnboundedSender<DownloadEvent>,
    requested: HashSet<usize>,
    downloaded: HashSet<usize>,
    errored: bool,
    last_progress_log: Option<std::time::Instant>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<DownloaderCommand>) {
        let mut poll = tokio::time::interval(ALERT_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(DownloaderCommand::Download(paths)) => self.handle_request(paths).await,
                        Some(DownloaderCommand::Stop) | None => break,
                    }
                }
                _ = poll.tick() => {
                    self.drain_alerts().await;
                }
            }
        }
        if let Err(err) = self.session.shutdown().await {
            warn!(error = %err, "swarm session teardown failed");
        }
    }

    async fn handle_request(&mut self, paths: Vec<String>) {
        if self.errored {
            debug!("ignoring download request after session error");
            return;
        }
        let mut enable = Vec::new();
        for path in paths {
            let Some(index) = self.meta.file_index(&path) else {
                debug!(path = %path, "ignoring request for path not in torrent");
                continue;
            };
            if self.downloaded.contains(&index) {
                // The swarm may have completed this file while satisfying an
                // overlapping piece range; serve the remembered completion.
                self.requested.insert(index);
                self.emit(DownloadEvent::Completed { path });
                continue;
            }
            if self.requested.insert(index) {
                enable.push(index);
            }
        }
        if enable.is_empty() {
            return;
        }
        debug!(files = enable.len(), "enabling files in swarm session");
        if let Err(err) = self.session.enable_files(&enable).await {
            self.fail(err.to_string()).await;
        }
    }

    async fn drain_alerts(&mut self) {
        if self.errored {
            return;
        }
        let alerts = match self.session.poll_alerts().await {
            Ok(alerts) => alerts,
            Err(err) => {
                self.fail(err.to_string()).await;
                return;
            }
        };
        for alert in alerts {
            match alert {
                SessionAlert::FileCompleted { index } => {
                    if !self.downloaded.insert(index) {
                        continue;
                    }
                    let Some(file) = self.meta.files().get(index) else {
                        continue;
                    };
                    if self.requested.contains(&index) {
                        info!(path = %file.path, "file download completed");
                        let path = file.path.clone();
                        self.emit(DownloadEvent::Completed { path });
                    } else {
                        debug!(path = %file.path, "remembering completion of unrequested file");
                    }
                }
                SessionAlert::Progress {
                    bytes_downloaded,
                    bytes_total,
                } => {
                    self.log_progress(bytes_downloaded, bytes_total);
                }
                SessionAlert::SessionError { message } => {
                    self.fail(message).await;
                    return;
                }
            }
        }
    }

    fn log_progress(&mut self, bytes_downloaded: u64, bytes_total: u64) {
        let now = std::time::Instant::now();
        let due = self
            .last_progress_log
            .map_or(true, |last| now.duration_since(last) >= PROGRESS_LOG_INTERVAL);
        if !due {
            return;
        }
        self.last_progress_log = Some(now);
        info!(
            downloaded_kb = bytes_downloaded / 1000,
            total_kb = bytes_total / 1000,
            "downloading torrent"
        );
    }

    async fn fail(&mut self, message: String) {
        if self.errored {
            return;
        }
        self.errored = true;
        warn!(error = %message, "swarm session failed");
        if let Err(err) = self.session.shutdown().await {
            warn!(error = %err, "swarm session teardown failed");
        }
        self.emit(DownloadEvent::Failed { message });
    }

    fn emit(&self, event: DownloadEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::PieceHash;
    use crate::session::StubSession;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;

    fn meta() -> TorrentMeta {
        TorrentMeta::from_parts(
            "dl",
            16,
            vec![PieceHash::new(vec![1; 20]), PieceHash::new(vec![2; 20])],
            vec![("one.bin".to_string(), 16), ("two.bin".to_string(), 16)],
        )
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> DownloadEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for download event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn requested_files_complete_through_the_event_stream() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut payloads = HashMap::new();
        payloads.insert(0, vec![0xAA; 16]);
        payloads.insert(1, vec![0xBB; 16]);
        let session = StubSession::with_payloads(meta(), dir.path(), payloads);
        let (downloader, mut events) = TorrentDownloader::start(meta(), Box::new(session));

        downloader
            .download_files(vec!["one.bin".to_string(), "missing.bin".to_string()])
            .await
            .expect("request");

        assert_eq!(
            next_event(&mut events).await,
            DownloadEvent::Completed {
                path: "one.bin".to_string()
            }
        );
        downloader.stop().await;
    }

    #[tokio::test]
    async fn duplicate_requests_complete_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut payloads = HashMap::new();
        payloads.insert(0, vec![0xAA; 16]);
        let session = StubSession::with_payloads(meta(), dir.path(), payloads);
        let (downloader, mut events) = TorrentDownloader::start(meta(), Box::new(session));

        downloader
            .download_files(vec!["one.bin".to_string(), "one.bin".to_string()])
            .await
            .expect("request");

        assert_eq!(
            next_event(&mut events).await,
            DownloadEvent::Completed {
                path: "one.bin".to_string()
            }
        );
        assert!(
            timeout(Duration::from_millis(400), events.recv())
                .await
                .is_err(),
            "duplicate request must not emit a second completion"
        );
        downloader.stop().await;
    }

    #[tokio::test]
    async fn session_errors_surface_once_as_failed() {
        let session = StubSession::unsupported("engine gone");
        let (downloader, mut events) = TorrentDownloader::start(meta(), Box::new(session));

        assert_eq!(
            next_event(&mut events).await,
            DownloadEvent::Failed {
                message: "engine gone".to_string()
            }
        );

        // Requests after the error are ignored rather than failing the caller.
        downloader
            .download_files(vec!["one.bin".to_string()])
            .await
            .expect("request");
        assert!(
            timeout(Duration::from_millis(400), events.recv())
                .await
                .is_err()
        );
        downloader.stop().await;
    }
}
