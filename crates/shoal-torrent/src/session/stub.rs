//! Deterministic in-process session used by tests and engine-less builds.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{SessionAlert, SwarmSession};
use crate::metainfo::TorrentMeta;

/// Simulated swarm session. Enabling a file writes its configured payload
/// under the save path and queues a completion alert for the next poll,
/// mimicking the piece-completion cadence of a real engine without any
/// network traffic.
pub struct StubSession {
    meta: Option<TorrentMeta>,
    save_path: PathBuf,
    payloads: HashMap<usize, Vec<u8>>,
    enabled: HashSet<usize>,
    pending: Vec<SessionAlert>,
    failure: Option<String>,
    down: bool,
}

impl StubSession {
    /// A session that will "download" the given per-index payloads.
    #[must_use]
    pub fn with_payloads(
        meta: TorrentMeta,
        save_path: impl Into<PathBuf>,
        payloads: HashMap<usize, Vec<u8>>,
    ) -> Self {
        Self {
            meta: Some(meta),
            save_path: save_path.into(),
            payloads,
            enabled: HashSet::new(),
            pending: Vec::new(),
            failure: None,
            down: false,
        }
    }

    /// A session that reports the given failure on its first poll.
    #[must_use]
    pub fn unsupported(message: &str) -> Self {
        Self {
            meta: None,
            save_path: PathBuf::new(),
            payloads: HashMap::new(),
            enabled: HashSet::new(),
            pending: Vec::new(),
            failure: Some(message.to_string()),
            down: false,
        }
    }

    fn materialize(&mut self, index: usize) -> Result<()> {
        let Some(meta) = &self.meta else {
            return Ok(());
        };
        let Some(file) = meta.files().get(index) else {
            return Ok(());
        };
        let payload = self.payloads.get(&index).cloned().unwrap_or_default();
        let target = self.save_path.join(&file.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create download directory {}", parent.display())
            })?;
        }
        std::fs::write(&target, payload)
            .with_context(|| format!("failed to write simulated payload {}", target.display()))?;
        self.pending.push(SessionAlert::FileCompleted { index });
        Ok(())
    }
}

#[async_trait]
impl SwarmSession for StubSession {
    async fn enable_files(&mut self, indexes: &[usize]) -> Result<()> {
        if self.down {
            return Ok(());
        }
        for &index in indexes {
            if self.enabled.insert(index) {
                self.materialize(index)?;
            }
        }
        Ok(())
    }

    async fn poll_alerts(&mut self) -> Result<Vec<SessionAlert>> {
        if self.down {
            return Ok(Vec::new());
        }
        let mut alerts = std::mem::take(&mut self.pending);
        if let Some(message) = self.failure.take() {
            alerts.push(SessionAlert::SessionError { message });
        }
        Ok(alerts)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.down = true;
        self.pending.clear();
        Ok(())
    }
}
