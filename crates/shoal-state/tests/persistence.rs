//! State survives process restarts: the resume path depends on tracked
//! statuses and the hashlist reading back identically from disk.

use std::collections::BTreeSet;

use shoal_state::{AppState, FileStatus};
use shoal_torrent::{FileHashRecord, Hashlist, PieceHash};

fn hash(byte: u8) -> PieceHash {
    PieceHash::new(vec![byte; 20])
}

#[tokio::test]
async fn statuses_and_hashlist_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("state.sqlite");

    {
        let state = AppState::open(&db_path, false).await.expect("open");
        state
            .add_uploading("1.zip", &["1_zip/inner.bin".to_string()])
            .await
            .expect("track archive");
        state.add_uploading("plain.bin", &[]).await.expect("track");
        state.mark_ready("plain.bin").await.expect("mark ready");

        let mut hashlist = Hashlist::new();
        hashlist.insert(
            "plain.bin".to_string(),
            FileHashRecord {
                hashes: vec![hash(7), hash(3)],
                linked: BTreeSet::new(),
            },
        );
        hashlist.insert(
            "1.zip".to_string(),
            FileHashRecord {
                hashes: vec![hash(1)],
                linked: ["1_zip/inner.bin".to_string()].into_iter().collect(),
            },
        );
        state.save_hashlist(&hashlist).await.expect("save hashlist");
    }

    // a fresh process sees the same picture
    let state = AppState::open(&db_path, false).await.expect("reopen");
    assert_eq!(
        state.get_status("plain.bin").await.expect("status"),
        Some(FileStatus::Ready)
    );
    assert_eq!(
        state.get_uploading_parent("1_zip/inner.bin").await.expect("parent"),
        Some("1.zip".to_string())
    );

    let hashlist = state.get_hashlist().await.expect("hashlist");
    assert_eq!(hashlist.len(), 2);
    let plain = hashlist.get("plain.bin").expect("plain record");
    assert_eq!(plain.hashes, vec![hash(7), hash(3)]);
    let archive = hashlist.get("1.zip").expect("archive record");
    assert!(archive.linked.contains("1_zip/inner.bin"));
}

#[tokio::test]
async fn reset_clears_everything_atomically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("state.sqlite");

    {
        let state = AppState::open(&db_path, false).await.expect("open");
        state.add_uploading("a.bin", &[]).await.expect("track");
        let mut hashlist = Hashlist::new();
        hashlist.insert(
            "a.bin".to_string(),
            FileHashRecord {
                hashes: vec![hash(9)],
                linked: BTreeSet::new(),
            },
        );
        state.save_hashlist(&hashlist).await.expect("save");
    }

    let state = AppState::open(&db_path, true).await.expect("reset open");
    assert_eq!(state.get_status("a.bin").await.expect("status"), None);
    assert!(state.get_hashlist().await.expect("hashlist").is_empty());
}
