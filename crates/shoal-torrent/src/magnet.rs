//! Magnet link detection and metadata resolution.

use anyhow::Result;

use crate::metainfo::TorrentMeta;

/// How long a metadata fetch attempt may run without completing before it
/// is considered stalled and restarted.
#[cfg(feature = "rqbit")]
const STALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
/// How many stalled or failed attempts to make before giving up.
#[cfg(feature = "rqbit")]
const FETCH_ATTEMPTS: u32 = 5;

/// Whether the argument parses as a magnet link.
#[must_use]
pub fn is_magnet(uri: &str) -> bool {
    magnet_url::Magnet::new(uri).is_ok()
}

/// Resolve a magnet link into full torrent metadata using a dedicated
/// metadata-only session.
///
/// Each attempt is bounded by a stall watchdog; a stalled or failed
/// attempt tears the session down and starts over, up to 5 attempts.
///
/// # Errors
///
/// Returns an error if the link is not a valid magnet URI, if every fetch
/// attempt stalls or fails, or if the `rqbit` feature is not compiled in.
pub async fn resolve_magnet(uri: &str) -> Result<TorrentMeta> {
    if !is_magnet(uri) {
        anyhow::bail!("not a valid magnet link: {uri}");
    }

    #[cfg(feature = "rqbit")]
    {
        for attempt in 1..=FETCH_ATTEMPTS {
            match tokio::time::timeout(STALL_TIMEOUT, fetch_metadata(uri)).await {
                Ok(Ok(meta)) => return Ok(meta),
                Ok(Err(err)) => {
                    tracing::warn!(attempt, error = %err, "magnet metadata fetch failed");
                }
                Err(_) => {
                    tracing::warn!(attempt, "magnet metadata fetch stalled; restarting session");
                }
            }
        }
        anyhow::bail!("failed to fetch magnet metadata after {FETCH_ATTEMPTS} attempts")
    }

    #[cfg(not(feature = "rqbit"))]
    {
        anyhow::bail!("magnet links require the `rqbit` feature")
    }
}

#[cfg(feature = "rqbit")]
async fn fetch_metadata(uri: &str) -> Result<TorrentMeta> {
    use anyhow::Context;
    use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Session};

    let session = Session::new(std::env::temp_dir())
        .await
        .context("failed to open metadata session")?;
    let response = session
        .add_torrent(
            AddTorrent::from_url(uri),
            Some(AddTorrentOptions {
                list_only: true,
                ..Default::default()
            }),
        )
        .await
        .context("failed to fetch magnet metadata")?;
    session.stop().await;

    match response {
        AddTorrentResponse::ListOnly(listing) => {
            TorrentMeta::from_bytes(listing.torrent_bytes.to_vec())
        }
        AddTorrentResponse::Added(..) | AddTorrentResponse::AlreadyManaged(..) => {
            anyhow::bail!("metadata session unexpectedly started a download")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnet_links_are_detected() {
        assert!(is_magnet(
            "magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10"
        ));
        assert!(!is_magnet("https://example.com/file.torrent"));
        assert!(!is_magnet("file.torrent"));
    }
}
