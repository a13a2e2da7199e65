//! The sync control loop.
//!
//! One task owns every piece of coordination state and drains the
//! download and upload event streams cooperatively. Nothing here is
//! shared: the downloader and uploader communicate exclusively through
//! event values, and the state store is touched only from this task.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use shoal_fsops::{FolderTracker, archive, paths};
use shoal_s3::{S3Uploader, UploadEvent, UploadJob};
use shoal_state::{AppState, FileStatus};
use shoal_torrent::{
    DownloadEvent, Hashlist, TorrentDownloader, TorrentMeta, diff_removed, diff_updated,
};

use crate::admission::AdmissionState;

/// Upload failure recorded for one file. Reported at the end of the run
/// and excluded from the persisted hashlist so the file retries next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUploadError {
    /// Relative path of the file.
    pub path: String,
    /// Failure description.
    pub message: String,
}

/// Behavior switches for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Scratch directory the swarm downloads into.
    pub download_path: PathBuf,
    /// Scratch byte budget; `u64::MAX` means unbounded.
    pub limit_size: u64,
    /// Expand supported archives and upload their contents instead.
    pub extract_files: bool,
    /// Pack non-archive files into single-entry ZIPs before uploading.
    pub archive_files: bool,
}

/// Outcome of a completed sync run.
#[derive(Debug)]
pub struct SyncReport {
    /// Per-file upload failures; empty on a fully clean run.
    pub file_errors: Vec<FileUploadError>,
    /// Whether the torrent session failed mid-run. Files not yet
    /// downloaded keep their previous hashlist entries and retry next
    /// run.
    pub download_error: bool,
}

/// The orchestrator: owns admission, folder tracking, and error
/// accounting for a single torrent sync.
pub struct SyncEngine {
    state: AppState,
    downloader: TorrentDownloader,
    download_events: Option<mpsc::UnboundedReceiver<DownloadEvent>>,
    uploader: S3Uploader,
    upload_events: Option<mpsc::UnboundedReceiver<UploadEvent>>,
    options: SyncOptions,
    meta: TorrentMeta,

    admission: AdmissionState,
    folders: FolderTracker,
    previous_hashlist: Hashlist,
    file_errors: Vec<FileUploadError>,
    download_error: bool,
    has_uploading: bool,
}

impl SyncEngine {
    /// Assemble an engine over already-constructed collaborators. The
    /// uploader must not be started yet; the engine runs its startup
    /// probe as part of [`SyncEngine::run`].
    pub fn new(
        state: AppState,
        downloader: TorrentDownloader,
        download_events: mpsc::UnboundedReceiver<DownloadEvent>,
        uploader: S3Uploader,
        upload_events: mpsc::UnboundedReceiver<UploadEvent>,
        options: SyncOptions,
    ) -> Self {
        let meta = downloader.metainfo().clone();
        Self {
            state,
            downloader,
            download_events: Some(download_events),
            uploader,
            upload_events: Some(upload_events),
            options,
            meta,
            admission: AdmissionState::new(BTreeSet::new()),
            folders: FolderTracker::new(),
            previous_hashlist: Hashlist::new(),
            file_errors: Vec::new(),
            download_error: false,
            has_uploading: false,
        }
    }

    /// Run the sync to completion: admit and download changed files,
    /// expand archives, upload, update the persisted hashlist, and
    /// delete objects for files the torrent no longer names.
    ///
    /// # Errors
    ///
    /// Returns an error for startup failures (state store, upload probe)
    /// and for state store failures mid-run. Per-file upload errors and
    /// torrent session failures are reported through the [`SyncReport`]
    /// instead.
    pub async fn run(mut self) -> Result<SyncReport> {
        self.init().await?;
        self.uploader
            .start()
            .await
            .context("object store startup probe failed")?;

        let first_chunk = self
            .admission
            .next_chunk(&self.meta, self.options.limit_size);
        if !first_chunk.is_empty() {
            self.downloader.download_files(first_chunk).await?;
        }

        self.drain_events().await?;
        info!("torrent download drained; finalizing");

        self.downloader.stop().await;
        self.uploader.stop().await;

        self.update_hashlist().await?;
        // Failed files were marked Ready to keep the pipeline moving;
        // demote them again so the next run's Ready filter does not
        // mask the retry their missing hashlist entry asks for.
        for error in &self.file_errors {
            self.state.mark_uploading(&error.path).await?;
        }
        self.delete_removed_files().await;

        Ok(SyncReport {
            file_errors: self.file_errors,
            download_error: self.download_error,
        })
    }

    async fn init(&mut self) -> Result<()> {
        self.previous_hashlist = self
            .state
            .get_hashlist()
            .await
            .context("failed to load persisted hashlist")?;

        let mut requested = BTreeSet::new();
        for path in diff_updated(&self.meta, &self.previous_hashlist) {
            // Files already Ready finished uploading in an interrupted
            // earlier run; they only look changed because the hashlist
            // is saved at the very end.
            if self.state.get_status(&path).await? == Some(FileStatus::Ready) {
                continue;
            }
            requested.insert(path);
        }
        info!(
            torrent = %self.meta.name(),
            files = self.meta.files().len(),
            to_sync = requested.len(),
            "sync target computed"
        );

        populate_folders(&mut self.folders, requested.iter());
        self.admission = AdmissionState::new(requested);
        Ok(())
    }

    async fn drain_events(&mut self) -> Result<()> {
        let (Some(mut download_events), Some(mut upload_events)) =
            (self.download_events.take(), self.upload_events.take())
        else {
            return Ok(());
        };
        let mut downloads_open = true;
        let mut uploads_open = true;
        while !self.is_completed() && (downloads_open || uploads_open) {
            tokio::select! {
                event = download_events.recv(), if downloads_open => {
                    match event {
                        Some(DownloadEvent::Completed { path }) => {
                            self.handle_download(path).await?;
                        }
                        Some(DownloadEvent::Failed { message }) => {
                            error!(error = %message, "torrent download failed");
                            self.download_error = true;
                            self.downloader.stop().await;
                        }
                        None => downloads_open = false,
                    }
                }
                event = upload_events.recv(), if uploads_open => {
                    match event {
                        Some(UploadEvent::Uploaded { path }) => {
                            self.handle_upload(&path, None).await?;
                        }
                        Some(UploadEvent::Failed { path, message }) => {
                            error!(path = %path, error = %message, "upload failed");
                            self.handle_upload(&path, Some(message)).await?;
                        }
                        None => uploads_open = false,
                    }
                }
            }
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        (self.admission.is_completed() || self.download_error) && !self.has_uploading
    }

    /// A torrent file landed in scratch: optionally expand it, record it
    /// with its children, and queue the uploads.
    async fn handle_download(&mut self, path: String) -> Result<()> {
        let full_path = self.options.download_path.join(&path);
        let mut children: Vec<String> = Vec::new();

        if self.options.extract_files && archive::is_packed(&full_path) {
            let extract_dir = paths::folder_for_unpacked(&full_path);
            match archive::unpack(&full_path, &extract_dir) {
                Err(err) => {
                    warn!(path = %path, error = %err, "could not extract archive; uploading as-is");
                }
                Ok(entries) => {
                    if entries.iter().any(|entry| entry.error.is_some()) {
                        warn!(path = %path, "some entries failed to extract; uploading archive as-is");
                    } else {
                        children = entries
                            .iter()
                            .map(|entry| {
                                let relative = paths::relative_to(
                                    Path::new(&entry.name),
                                    &self.options.download_path,
                                );
                                paths::strip_dot_prefix(&relative.to_string_lossy()).to_string()
                            })
                            .collect();
                        // the archive itself is done; its children take over
                        if let Err(err) = std::fs::remove_file(&full_path) {
                            warn!(path = %path, error = %err, "failed to remove extracted archive");
                        }
                        self.folders.remove_child(&path);
                    }
                    populate_folders(&mut self.folders, children.iter());
                }
            }
        }

        self.state.add_uploading(&path, &children).await?;

        let uploads = if children.is_empty() {
            vec![path]
        } else {
            children
        };
        for file in uploads {
            self.has_uploading = true;
            let full = self.options.download_path.join(&file);
            let archive_before_upload = self.options.archive_files && !archive::is_packed(&full);
            self.uploader.enqueue(UploadJob {
                relative_path: file,
                archive_before_upload,
            })?;
        }
        Ok(())
    }

    /// An upload finished (or failed terminally): clean the scratch copy,
    /// advance file and parent lifecycle state, and top up admission.
    async fn handle_upload(&mut self, path: &str, upload_error: Option<String>) -> Result<()> {
        if let Some(message) = upload_error {
            // recorded, then accounted exactly like a success so one bad
            // file cannot wedge the pipeline
            self.file_errors.push(FileUploadError {
                path: path.to_string(),
                message,
            });
        }

        let parent = self.state.get_uploading_parent(path).await?;

        self.delete_local(path);
        self.state.mark_ready(path).await?;

        match parent {
            None => {
                // a torrent-level file finished its whole cycle
                self.admission.complete(path);
            }
            Some(parent) => {
                let uploading = self.state.get_uploading_files().await?;
                let siblings_pending = uploading
                    .get(&parent)
                    .map_or(false, |children| !children.is_empty());
                if !siblings_pending {
                    self.admission.complete(&parent);
                    self.state.mark_ready(&parent).await?;
                }
            }
        }

        if self.state.get_uploading_files().await?.is_empty() {
            self.has_uploading = false;
        }

        if self.download_error {
            return Ok(());
        }
        // While siblings from the same archive are still uploading, their
        // shared parent holds its admission slot; don't top up yet.
        if self.state.get_uploading_parent(path).await?.is_some() {
            return Ok(());
        }
        let chunk = self
            .admission
            .next_chunk(&self.meta, self.options.limit_size);
        if !chunk.is_empty() {
            self.downloader.download_files(chunk).await?;
        }
        Ok(())
    }

    /// Delete the uploaded file from scratch and prune emptied ancestor
    /// directories, stopping at `.` or the first still-populated folder.
    fn delete_local(&mut self, path: &str) {
        let mut name = path.to_string();
        loop {
            if name.is_empty() || name == "." {
                break;
            }
            let full = self.options.download_path.join(&name);
            debug!(path = %full.display(), "deleting local copy");
            remove_path(&full);

            let Some(parent) = self.folders.parent_of(&name).map(str::to_string) else {
                break;
            };
            self.folders.remove_child(&name);
            if self
                .folders
                .files()
                .get(&parent)
                .map_or(false, |children| !children.is_empty())
            {
                break;
            }
            self.folders.remove_parent(&parent);
            name = parent;
        }
    }

    /// Rebuild and persist the hashlist from the torrent and the
    /// completed parent/child links, leaving out files that failed to
    /// upload so the next run retries them.
    async fn update_hashlist(&mut self) -> Result<()> {
        let completed = self.state.get_completed_files().await?;
        let mut hashlist = Hashlist::build(&self.meta, &completed);
        for error in &self.file_errors {
            hashlist.remove(&error.path);
        }
        if self.download_error {
            // keep the previous records for files this run never finished,
            // and drop entries for files that were not downloaded at all
            for file in self.meta.files() {
                let finished = self.state.get_status(&file.path).await?
                    == Some(FileStatus::Ready);
                if finished {
                    continue;
                }
                match self.previous_hashlist.get(&file.path) {
                    Some(record) => hashlist.insert(file.path.clone(), record.clone()),
                    None => hashlist.remove(&file.path),
                }
            }
        }
        self.state
            .save_hashlist(&hashlist)
            .await
            .context("failed to persist hashlist")?;
        info!(files = hashlist.len(), "hashlist persisted");
        Ok(())
    }

    /// Delete objects for files the torrent no longer names, including
    /// linked children of removed archive parents.
    async fn delete_removed_files(&mut self) {
        for removed in diff_removed(&self.previous_hashlist, &self.meta) {
            let linked: Vec<String> = self
                .previous_hashlist
                .get(&removed)
                .map(|record| record.linked.iter().cloned().collect())
                .unwrap_or_default();
            for path in std::iter::once(removed.clone()).chain(linked) {
                info!(path = %path, "deleting object removed from torrent");
                if let Err(err) = self.uploader.delete_remote(&path).await {
                    warn!(path = %path, error = %err, "failed to delete removed object");
                }
            }
        }
    }
}

/// Register every ancestor directory of each file so cleanup can prune
/// emptied folders bottom-up.
fn populate_folders<I, S>(folders: &mut FolderTracker, files: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for file in files {
        let mut child = file.as_ref().to_string();
        loop {
            let parent = match Path::new(&child).parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    parent.to_string_lossy().into_owned()
                }
                _ => break,
            };
            if folders.parent_of(&child).is_some() {
                break;
            }
            folders.add(&parent, [child.clone()]);
            child = parent;
        }
    }
}

/// Remove a file or (empty) directory, logging rather than failing:
/// local cleanup problems must not stop the sync.
fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(err) = result {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove scratch entry");
        }
    }
}
