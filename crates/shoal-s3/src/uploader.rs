//! Parallel upload pipeline.
//!
//! A fixed pool of worker tasks consumes a shared FIFO work queue and
//! reports per-file outcomes on a progress channel. Workers never panic
//! across the task boundary: every failure becomes an event value.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffPolicy, retry};
use crate::store::{ObjectStore, StoreError, object_key};

/// Worker pool size when the caller passes `0`.
const DEFAULT_WORKERS: usize = 16;

/// One file the pool should upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    /// Path relative to the scratch root; also the object key suffix.
    pub relative_path: String,
    /// Pack the file into a single-entry ZIP before uploading.
    pub archive_before_upload: bool,
}

enum UploadTask {
    File(UploadJob),
    Terminate,
}

/// Per-file outcomes emitted by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// The file was stored successfully.
    Uploaded {
        /// Relative path of the uploaded file.
        path: String,
    },
    /// The upload failed after exhausting retries, or hit a hard error.
    Failed {
        /// Relative path of the failed file.
        path: String,
        /// Failure description.
        message: String,
    },
}

/// Settings for the upload pool.
#[derive(Debug, Clone)]
pub struct UploaderOptions {
    /// Worker task count; `0` selects the default of 16.
    pub workers: usize,
    /// Scratch root that relative paths resolve against.
    pub path_from: PathBuf,
    /// Object key prefix; empty uploads to the bucket root.
    pub path_to: String,
    /// Retry schedule for transient failures.
    pub backoff: BackoffPolicy,
}

struct WorkerContext {
    store: Arc<dyn ObjectStore>,
    path_from: PathBuf,
    path_to: String,
    backoff: BackoffPolicy,
    events: mpsc::UnboundedSender<UploadEvent>,
}

/// Pool of upload workers over a shared work queue.
pub struct S3Uploader {
    context: Arc<WorkerContext>,
    workers: usize,
    queue_tx: mpsc::UnboundedSender<UploadTask>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<UploadTask>>>,
    handles: Vec<JoinHandle<()>>,
}

impl S3Uploader {
    /// Create the pool (not yet started) and its progress event stream.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        options: UploaderOptions,
    ) -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let workers = if options.workers == 0 {
            DEFAULT_WORKERS
        } else {
            options.workers
        };
        // The queue is structurally unbounded; admission keeps the useful
        // work bounded by the scratch budget.
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let context = Arc::new(WorkerContext {
            store,
            path_from: options.path_from,
            path_to: options.path_to,
            backoff: options.backoff,
            events: event_tx,
        });
        (
            Self {
                context,
                workers,
                queue_tx,
                queue_rx: Arc::new(Mutex::new(queue_rx)),
                handles: Vec::new(),
            },
            event_rx,
        )
    }

    /// Verify the destination and start the worker pool.
    ///
    /// The probe requires the bucket to exist and a PUT plus DELETE of an
    /// empty object under a random key below the prefix to succeed. On
    /// any probe failure no workers are started.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is missing or not writable.
    pub async fn start(&mut self) -> Result<()> {
        let reachable = self
            .context
            .store
            .bucket_exists()
            .await
            .context("bucket reachability check failed")?;
        ensure!(reachable, "bucket does not exist or is not reachable");

        let probe_key = object_key(
            &self.context.path_to,
            &format!(".shoal-probe-{:016x}", rand::random::<u64>()),
        );
        self.context
            .store
            .put_empty(&probe_key)
            .await
            .context("probe upload failed; bucket is not writable")?;
        self.context
            .store
            .delete_object(&probe_key)
            .await
            .context("probe cleanup failed; bucket is not writable")?;
        debug!(probe_key = %probe_key, "object store probe passed");

        for index in 0..self.workers {
            let context = Arc::clone(&self.context);
            let queue = Arc::clone(&self.queue_rx);
            self.handles.push(tokio::spawn(async move {
                worker_loop(index, context, queue).await;
            }));
        }
        info!(workers = self.workers, "upload pool started");
        Ok(())
    }

    /// Queue a file for upload.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool has been stopped.
    pub fn enqueue(&self, job: UploadJob) -> Result<()> {
        self.queue_tx
            .send(UploadTask::File(job))
            .map_err(|_| anyhow::anyhow!("upload queue is closed"))
    }

    /// Enqueue one terminate sentinel per worker and wait for the pool to
    /// drain. In-flight uploads run to their current attempt's completion.
    pub async fn stop(&mut self) {
        for _ in 0..self.workers {
            if self.queue_tx.send(UploadTask::Terminate).is_err() {
                break;
            }
        }
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "upload worker terminated abnormally");
            }
        }
    }

    /// Delete a synced object by its relative path, with the same backoff
    /// policy uploads use.
    ///
    /// # Errors
    ///
    /// Returns the final store error once retries are exhausted.
    pub async fn delete_remote(&self, relative: &str) -> Result<(), StoreError> {
        let key = object_key(&self.context.path_to, relative);
        let store = Arc::clone(&self.context.store);
        retry(self.context.backoff, "delete object", || {
            let store = Arc::clone(&store);
            let key = key.clone();
            async move { store.delete_object(&key).await }
        })
        .await
    }

    /// Whether an object exists for the given relative path.
    ///
    /// # Errors
    ///
    /// Returns the store error if the probe fails.
    pub async fn object_exists(&self, relative: &str) -> Result<bool, StoreError> {
        let key = object_key(&self.context.path_to, relative);
        self.context.store.object_exists(&key).await
    }
}

async fn worker_loop(
    index: usize,
    context: Arc<WorkerContext>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<UploadTask>>>,
) {
    debug!(worker = index, "upload worker started");
    loop {
        let task = {
            let mut receiver = queue.lock().await;
            receiver.recv().await
        };
        match task {
            Some(UploadTask::File(job)) => process_job(index, &context, job).await,
            Some(UploadTask::Terminate) | None => break,
        }
    }
    debug!(worker = index, "upload worker completed");
}

async fn process_job(index: usize, context: &WorkerContext, job: UploadJob) {
    let key = object_key(&context.path_to, &job.relative_path);
    info!(worker = index, path = %job.relative_path, key = %key, "uploading");
    let result = upload_file(context, &job, &key).await;
    let event = match result {
        Ok(()) => UploadEvent::Uploaded {
            path: job.relative_path,
        },
        Err(err) => {
            warn!(worker = index, key = %key, error = %err, "upload failed");
            UploadEvent::Failed {
                path: job.relative_path,
                message: err.to_string(),
            }
        }
    };
    let _ = context.events.send(event);
}

async fn upload_file(context: &WorkerContext, job: &UploadJob, key: &str) -> Result<(), StoreError> {
    let source = context.path_from.join(&job.relative_path);

    // Packing happens once; only the PUT itself is retried.
    let _packed_guard;
    let upload_source = if job.archive_before_upload {
        let packed = pack_to_temp(&source).await?;
        let path = packed.path().to_path_buf();
        _packed_guard = packed;
        path
    } else {
        source
    };

    retry(context.backoff, "put object", || {
        let key = key.to_string();
        let path = upload_source.clone();
        let store = Arc::clone(&context.store);
        async move { store.put_object(&key, &path).await }
    })
    .await
}

async fn pack_to_temp(source: &std::path::Path) -> Result<tempfile::NamedTempFile, StoreError> {
    let source = source.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let temp = tempfile::NamedTempFile::new().map_err(|err| {
            StoreError::transport(format!("failed to create temporary archive: {err}"))
        })?;
        shoal_fsops::zip_one(&source, temp.path()).map_err(|err| {
            StoreError::transport(format!(
                "failed to archive {} before upload: {err}",
                source.display()
            ))
        })?;
        Ok(temp)
    })
    .await
    .map_err(|err| StoreError::transport(format!("archive task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    fn quick_backoff() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
            attempts: 5,
        }
    }

    /// Store whose PUTs fail with 429 a fixed number of times before
    /// succeeding. Probe traffic is always accepted.
    struct ThrottlingStore {
        remaining_throttles: Mutex<u32>,
        file_puts: AtomicU32,
        stored: Mutex<HashMap<String, Vec<u8>>>,
        bucket_present: bool,
        hard_status: Option<u16>,
    }

    impl ThrottlingStore {
        fn new(throttles: u32) -> Self {
            Self {
                remaining_throttles: Mutex::new(throttles),
                file_puts: AtomicU32::new(0),
                stored: Mutex::new(HashMap::new()),
                bucket_present: true,
                hard_status: None,
            }
        }

        fn hard_failing(status: u16) -> Self {
            Self {
                hard_status: Some(status),
                ..Self::new(0)
            }
        }

        fn without_bucket() -> Self {
            Self {
                bucket_present: false,
                ..Self::new(0)
            }
        }
    }

    #[async_trait]
    impl ObjectStore for ThrottlingStore {
        async fn bucket_exists(&self) -> Result<bool, StoreError> {
            Ok(self.bucket_present)
        }

        async fn put_object(&self, key: &str, source: &Path) -> Result<(), StoreError> {
            self.file_puts.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.hard_status {
                return Err(StoreError::http(status, "hard failure"));
            }
            {
                let mut remaining = self.remaining_throttles.lock().await;
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::http(429, "slow down"));
                }
            }
            let body = std::fs::read(source)
                .map_err(|err| StoreError::transport(err.to_string()))?;
            self.stored.lock().await.insert(key.to_string(), body);
            Ok(())
        }

        async fn put_empty(&self, key: &str) -> Result<(), StoreError> {
            self.stored.lock().await.insert(key.to_string(), Vec::new());
            Ok(())
        }

        async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
            self.stored.lock().await.remove(key);
            Ok(())
        }

        async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
            Ok(self.stored.lock().await.contains_key(key))
        }
    }

    fn options(dir: &Path) -> UploaderOptions {
        UploaderOptions {
            workers: 2,
            path_from: dir.to_path_buf(),
            path_to: "sync".to_string(),
            backoff: quick_backoff(),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<UploadEvent>) -> UploadEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for upload event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn throttled_uploads_retry_and_succeed_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.bin"), b"payload").expect("write");

        let store = Arc::new(ThrottlingStore::new(2));
        let (mut uploader, mut events) = S3Uploader::new(store.clone(), options(dir.path()));
        uploader.start().await.expect("start");

        uploader
            .enqueue(UploadJob {
                relative_path: "a.bin".to_string(),
                archive_before_upload: false,
            })
            .expect("enqueue");

        assert_eq!(
            next_event(&mut events).await,
            UploadEvent::Uploaded {
                path: "a.bin".to_string()
            }
        );
        // two throttles plus the successful attempt
        assert_eq!(store.file_puts.load(Ordering::SeqCst), 3);
        assert!(store.stored.lock().await.contains_key("sync/a.bin"));
        uploader.stop().await;
    }

    #[tokio::test]
    async fn hard_errors_fail_without_retry() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.bin"), b"payload").expect("write");

        let store = Arc::new(ThrottlingStore::hard_failing(403));
        let (mut uploader, mut events) = S3Uploader::new(store.clone(), options(dir.path()));
        uploader.start().await.expect("start");

        uploader
            .enqueue(UploadJob {
                relative_path: "a.bin".to_string(),
                archive_before_upload: false,
            })
            .expect("enqueue");

        match next_event(&mut events).await {
            UploadEvent::Failed { path, message } => {
                assert_eq!(path, "a.bin");
                assert!(message.contains("403"), "unexpected message: {message}");
            }
            other => panic!("expected failure event, got {other:?}"),
        }
        assert_eq!(store.file_puts.load(Ordering::SeqCst), 1);
        uploader.stop().await;
    }

    #[tokio::test]
    async fn missing_bucket_aborts_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ThrottlingStore::without_bucket());
        let (mut uploader, _events) = S3Uploader::new(store, options(dir.path()));
        assert!(uploader.start().await.is_err());
    }

    #[tokio::test]
    async fn archive_before_upload_wraps_the_file_in_a_zip() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("notes.txt"), b"text body").expect("write");

        let store = Arc::new(ThrottlingStore::new(0));
        let (mut uploader, mut events) = S3Uploader::new(store.clone(), options(dir.path()));
        uploader.start().await.expect("start");

        uploader
            .enqueue(UploadJob {
                relative_path: "notes.txt".to_string(),
                archive_before_upload: true,
            })
            .expect("enqueue");

        assert_eq!(
            next_event(&mut events).await,
            UploadEvent::Uploaded {
                path: "notes.txt".to_string()
            }
        );
        let stored = store.stored.lock().await;
        let body = stored.get("sync/notes.txt").expect("object stored");
        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(body.clone())).expect("stored body is a zip");
        let mut entry = archive.by_index(0).expect("single entry");
        assert_eq!(entry.name(), "notes.txt");
        let mut contents = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut contents).expect("read");
        assert_eq!(contents, b"text body");
        uploader.stop().await;
    }

    #[tokio::test]
    async fn delete_remote_uses_the_configured_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ThrottlingStore::new(0));
        store.put_empty("sync/old.bin").await.expect("seed");

        let (uploader, _events) = S3Uploader::new(store.clone(), options(dir.path()));
        uploader.delete_remote("old.bin").await.expect("delete");
        assert!(!store.stored.lock().await.contains_key("sync/old.bin"));
    }
}
