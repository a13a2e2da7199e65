//! Torrent argument interpretation and metadata resolution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use shoal_torrent::{TorrentMeta, magnet};

/// Where the torrent metadata comes from. Detection order: a parsable
/// magnet link wins, then an `http(s)` URL, and anything else must be a
/// local file that exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TorrentSource {
    Magnet(String),
    HttpUrl(String),
    LocalFile(PathBuf),
}

impl TorrentSource {
    pub(crate) fn detect(argument: &str) -> Result<Self> {
        if magnet::is_magnet(argument) {
            return Ok(Self::Magnet(argument.to_string()));
        }
        if is_http_url(argument) {
            return Ok(Self::HttpUrl(argument.to_string()));
        }
        let path = Path::new(argument);
        if !path.exists() {
            bail!("torrent file not found at {argument}");
        }
        Ok(Self::LocalFile(path.to_path_buf()))
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Magnet(uri) => format!("magnet link \"{uri}\""),
            Self::HttpUrl(url) => format!("url \"{url}\""),
            Self::LocalFile(path) => format!("file \"{}\"", path.display()),
        }
    }

    /// Load the full torrent metadata for this source.
    pub(crate) async fn resolve(&self) -> Result<TorrentMeta> {
        match self {
            Self::Magnet(uri) => {
                info!("fetching magnet link metadata");
                magnet::resolve_magnet(uri)
                    .await
                    .context("failed to load magnet link metadata")
            }
            Self::HttpUrl(url) => {
                info!(url = %url, "downloading torrent file");
                fetch_torrent(url).await
            }
            Self::LocalFile(path) => TorrentMeta::from_file(path)
                .with_context(|| format!("failed to load torrent info from {}", path.display())),
        }
    }
}

fn is_http_url(argument: &str) -> bool {
    reqwest::Url::parse(argument)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

async fn fetch_torrent(url: &str) -> Result<TorrentMeta> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("failed to download torrent from {url}"))?
        .error_for_status()
        .with_context(|| format!("torrent download from {url} was rejected"))?;
    let body = response
        .bytes()
        .await
        .with_context(|| format!("failed to read torrent body from {url}"))?;
    TorrentMeta::from_bytes(body.to_vec()).context("could not parse downloaded .torrent file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnet_links_win_detection() {
        let source = TorrentSource::detect(
            "magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10",
        )
        .expect("magnet detection");
        assert!(matches!(source, TorrentSource::Magnet(_)));
    }

    #[test]
    fn http_urls_are_detected() {
        let source =
            TorrentSource::detect("https://example.com/linux.torrent").expect("url detection");
        assert_eq!(
            source,
            TorrentSource::HttpUrl("https://example.com/linux.torrent".to_string())
        );
    }

    #[test]
    fn missing_local_files_are_a_startup_error() {
        let err = TorrentSource::detect("definitely/not/present.torrent")
            .expect_err("missing file should fail");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn existing_local_files_are_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("demo.torrent");
        std::fs::write(&path, b"not actually parsed here").expect("write");

        let argument = path.to_string_lossy().into_owned();
        let source = TorrentSource::detect(&argument).expect("local detection");
        assert!(matches!(source, TorrentSource::LocalFile(_)));
    }
}
