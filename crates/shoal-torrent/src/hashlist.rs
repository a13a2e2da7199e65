//! Per-file piece-hash bookkeeping.
//!
//! Piece-hash equality is the resync oracle: it detects any byte-level
//! content change using hashes the torrent already carries, so deciding
//! whether a file needs re-downloading costs no local I/O.

use std::collections::{BTreeMap, BTreeSet};

use crate::metainfo::{PieceHash, TorrentMeta};

/// Hashes and extraction links recorded for one torrent file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHashRecord {
    /// Piece hashes covering the file, in piece order.
    pub hashes: Vec<PieceHash>,
    /// Paths extracted out of this file when it was an archive parent.
    pub linked: BTreeSet<String>,
}

/// Mapping from torrent file path to its [`FileHashRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hashlist {
    records: BTreeMap<String, FileHashRecord>,
}

impl Hashlist {
    /// An empty hashlist, the state before the first successful sync.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the hashlist for the given torrent, attaching the supplied
    /// linked-files sets to archive parents. Files without an entry in
    /// `linked_files` get an empty set.
    #[must_use]
    pub fn build(meta: &TorrentMeta, linked_files: &BTreeMap<String, Vec<String>>) -> Self {
        let mut records = BTreeMap::new();
        for file in meta.files() {
            let linked = linked_files
                .get(&file.path)
                .map(|children| children.iter().cloned().collect())
                .unwrap_or_default();
            records.insert(
                file.path.clone(),
                FileHashRecord {
                    hashes: meta.file_hashes(&file.path),
                    linked,
                },
            );
        }
        Self { records }
    }

    /// Insert or replace the record for a path.
    pub fn insert(&mut self, path: String, record: FileHashRecord) {
        self.records.insert(path, record);
    }

    /// Drop a path from the hashlist. Used to force a retry on the next
    /// run for files whose upload failed.
    pub fn remove(&mut self, path: &str) {
        self.records.remove(path);
    }

    /// Look up the record for a path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FileHashRecord> {
        self.records.get(path)
    }

    /// Number of recorded files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the hashlist has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileHashRecord)> {
        self.records.iter()
    }
}

/// Every torrent file whose current piece-hash sequence is not bytewise
/// equal to the previous record. A file absent from `previous` counts as
/// updated.
#[must_use]
pub fn diff_updated(meta: &TorrentMeta, previous: &Hashlist) -> BTreeSet<String> {
    let mut updated = BTreeSet::new();
    for file in meta.files() {
        let current = meta.file_hashes(&file.path);
        let known = previous
            .get(&file.path)
            .map(|record| record.hashes.as_slice());
        if known != Some(current.as_slice()) {
            updated.insert(file.path.clone());
        }
    }
    updated
}

/// Every path present in `previous` but no longer named by the torrent.
#[must_use]
pub fn diff_removed(previous: &Hashlist, meta: &TorrentMeta) -> BTreeSet<String> {
    let mut removed: BTreeSet<String> = previous.iter().map(|(path, _)| path.clone()).collect();
    for file in meta.files() {
        removed.remove(&file.path);
    }
    removed
}
