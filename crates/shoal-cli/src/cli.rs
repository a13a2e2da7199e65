//! Argument surface of the `shoal` binary.
//!
//! Arguments are plain ASCII; non-ASCII argv is unsupported (Windows
//! code pages in particular make no round-trip guarantees).

use std::path::PathBuf;

use clap::Parser;

/// File name of the state database when `--state-file` is not given.
pub(crate) const STATE_STORAGE_NAME: &str = "default.sqlite";

#[derive(Parser, Debug)]
#[command(
    name = "shoal",
    version,
    disable_version_flag = true,
    about = "Synchronize a torrent swarm's files into S3-compatible object storage"
)]
pub(crate) struct Cli {
    /// Torrent file path, HTTP URL, or magnet link.
    #[arg(short = 't', long)]
    pub torrent: String,

    /// S3 service URL.
    #[arg(short = 's', long = "s3-url")]
    pub s3_url: String,

    /// S3 bucket.
    #[arg(short = 'b', long = "s3-bucket")]
    pub s3_bucket: String,

    /// S3 region.
    #[arg(short = 'r', long = "s3-region")]
    pub s3_region: Option<String>,

    /// S3 key prefix for uploaded files; empty uploads to the bucket root.
    #[arg(short = 'u', long = "s3-upload-path", default_value = "")]
    pub s3_upload_path: String,

    /// S3 access key.
    #[arg(short = 'a', long = "s3-access-key", env = "SHOAL_S3_ACCESS_KEY")]
    pub s3_access_key: String,

    /// S3 secret key.
    #[arg(
        short = 'k',
        long = "s3-secret-key",
        env = "SHOAL_S3_SECRET_KEY",
        hide_env_values = true
    )]
    pub s3_secret_key: String,

    /// Temporary directory for downloaded files.
    #[arg(short = 'd', long = "download-path", default_value = ".")]
    pub download_path: PathBuf,

    /// Scratch directory byte budget; unlimited when omitted.
    #[arg(short = 'l', long = "limit-size")]
    pub limit_size: Option<u64>,

    /// Extract downloaded archives before uploading.
    #[arg(short = 'x', long = "extract-files")]
    pub extract_files: bool,

    /// Pack non-archive files into single-entry ZIPs before uploading.
    #[arg(short = 'z', long = "archive-files")]
    pub archive_files: bool,

    /// Path to the application state file. Default is
    /// `<download-path>/default.sqlite`.
    #[arg(short = 'q', long = "state-file")]
    pub state_file: Option<PathBuf>,

    /// Show version.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

impl Cli {
    /// The state database location, applying the download-path default.
    pub(crate) fn state_file_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.download_path.join(STATE_STORAGE_NAME))
    }

    /// The scratch budget, `u64::MAX` when unlimited.
    pub(crate) fn budget(&self) -> u64 {
        self.limit_size.unwrap_or(u64::MAX)
    }
}
