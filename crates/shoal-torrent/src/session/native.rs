//! librqbit-backed swarm session.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session};

use super::{SessionAlert, SwarmSession};
use crate::metainfo::TorrentMeta;

pub(crate) async fn create_session(
    meta: &TorrentMeta,
    save_path: &Path,
) -> Result<Box<dyn SwarmSession>> {
    if meta.raw_bytes().is_empty() {
        bail!("torrent metadata carries no metainfo blob to hand to the engine");
    }

    let session = Session::new(save_path.to_path_buf())
        .await
        .context("failed to open swarm session")?;

    // Every file starts at skip priority; the downloader raises files
    // explicitly as admission allows.
    let response = session
        .add_torrent(
            AddTorrent::from_bytes(meta.raw_bytes().to_vec()),
            Some(AddTorrentOptions {
                only_files: Some(Vec::new()),
                overwrite: true,
                ..Default::default()
            }),
        )
        .await
        .context("failed to add torrent to swarm session")?;

    let handle = match response {
        AddTorrentResponse::Added(_, handle) | AddTorrentResponse::AlreadyManaged(_, handle) => {
            handle
        }
        AddTorrentResponse::ListOnly(_) => {
            bail!("engine returned a list-only response for a download session")
        }
    };

    let sizes = meta.files().iter().map(|file| file.size).collect();
    Ok(Box::new(RqbitSession {
        session,
        handle,
        sizes,
        enabled: HashSet::new(),
        reported: HashSet::new(),
        errored: false,
        down: false,
    }))
}

struct RqbitSession {
    session: Arc<Session>,
    handle: Arc<ManagedTorrent>,
    sizes: Vec<u64>,
    enabled: HashSet<usize>,
    reported: HashSet<usize>,
    errored: bool,
    down: bool,
}

#[async_trait]
impl SwarmSession for RqbitSession {
    async fn enable_files(&mut self, indexes: &[usize]) -> Result<()> {
        if self.down {
            return Ok(());
        }
        let before = self.enabled.len();
        self.enabled.extend(indexes.iter().copied());
        if self.enabled.len() == before {
            return Ok(());
        }
        self.handle
            .update_only_files(&self.enabled)
            .context("failed to update file selection in swarm session")
    }

    async fn poll_alerts(&mut self) -> Result<Vec<SessionAlert>> {
        if self.down {
            return Ok(Vec::new());
        }
        let stats = self.handle.stats();
        let mut alerts = Vec::new();

        if let Some(message) = stats.error {
            if !self.errored {
                self.errored = true;
                alerts.push(SessionAlert::SessionError { message });
            }
            return Ok(alerts);
        }

        if !self.enabled.is_empty() {
            alerts.push(SessionAlert::Progress {
                bytes_downloaded: stats.progress_bytes,
                bytes_total: stats.total_bytes,
            });
        }
        for &index in &self.enabled {
            if self.reported.contains(&index) {
                continue;
            }
            let done = stats.file_progress.get(index).copied().unwrap_or(0);
            let size = self.sizes.get(index).copied().unwrap_or(u64::MAX);
            if done >= size {
                self.reported.insert(index);
                alerts.push(SessionAlert::FileCompleted { index });
            }
        }
        Ok(alerts)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.down {
            return Ok(());
        }
        self.down = true;
        self.session.stop().await;
        Ok(())
    }
}
