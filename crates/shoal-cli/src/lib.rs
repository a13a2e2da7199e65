#![forbid(unsafe_code)]
#![deny(clippy::all, rustdoc::broken_intra_doc_links)]

//! Composition root for the `shoal` binary: argument parsing, torrent
//! source resolution, and wiring of the state store, swarm session,
//! upload pool, and sync engine.

mod cli;
mod source;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use shoal_s3::{AwsObjectStore, BackoffPolicy, S3Config, S3Uploader, UploaderOptions};
use shoal_state::AppState;
use shoal_sync::{SyncEngine, SyncOptions, SyncReport};
use shoal_torrent::{TorrentDownloader, create_session};

use crate::cli::Cli;
use crate::source::TorrentSource;

/// Parse arguments, run the sync, and report. Returns the process exit
/// code: zero for a completed sync (even with per-file upload errors,
/// which land on stderr), non-zero for startup failures.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    init_logging();

    match execute(cli).await {
        Ok(report) => {
            for error in &report.file_errors {
                eprintln!("failed to sync {}: {}", error.path, error.message);
            }
            if report.download_error {
                eprintln!("sync finished with a torrent download error; rerun to resume");
            } else {
                info!("sync completed");
            }
            0
        }
        Err(err) => {
            eprintln!("shoal: {err:#}");
            1
        }
    }
}

async fn execute(cli: Cli) -> Result<SyncReport> {
    let source = TorrentSource::detect(&cli.torrent)?;
    if cli.limit_size.is_none() {
        info!(
            source = %source.describe(),
            scratch = %cli.download_path.display(),
            "downloading without a size limit"
        );
    } else {
        info!(
            source = %source.describe(),
            scratch = %cli.download_path.display(),
            limit_bytes = cli.budget(),
            "downloading with a scratch size limit"
        );
    }

    std::fs::create_dir_all(&cli.download_path).with_context(|| {
        format!(
            "failed to create download directory {}",
            cli.download_path.display()
        )
    })?;

    let meta = source.resolve().await?;
    info!(torrent = %meta.name(), files = meta.files().len(), "torrent metadata loaded");

    let state = AppState::open(&cli.state_file_path(), false)
        .await
        .context("failed to open state database")?;

    let store = AwsObjectStore::new(&S3Config {
        endpoint_url: cli.s3_url.clone(),
        bucket: cli.s3_bucket.clone(),
        region: cli.s3_region.clone(),
        access_key: cli.s3_access_key.clone(),
        secret_key: cli.s3_secret_key.clone(),
    });
    let (uploader, upload_events) = S3Uploader::new(
        Arc::new(store),
        UploaderOptions {
            workers: 0,
            path_from: cli.download_path.clone(),
            path_to: cli.s3_upload_path.clone(),
            backoff: BackoffPolicy::default(),
        },
    );

    let session = create_session(&meta, &cli.download_path)
        .await
        .context("failed to start the swarm session")?;
    let (downloader, download_events) = TorrentDownloader::start(meta, session);

    let engine = SyncEngine::new(
        state,
        downloader,
        download_events,
        uploader,
        upload_events,
        SyncOptions {
            download_path: cli.download_path.clone(),
            limit_size: cli.budget(),
            extract_files: cli.extract_files,
            archive_files: cli.archive_files,
        },
    );
    let report = engine.run().await?;

    if !report.file_errors.is_empty() {
        warn!(
            failed = report.file_errors.len(),
            "some files failed to upload; they will retry on the next run"
        );
    }
    Ok(report)
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("SHOAL_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
