//! Parsed torrent metadata as the sync engine consumes it.
//!
//! The torrent's own file paths are the canonical identity used everywhere
//! downstream (state rows, hashlist keys, admission sets, object keys), so
//! this module is careful to reproduce them verbatim and never round-trip
//! them through path APIs that could normalize or case-fold.

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result, bail};
use lava_torrent::torrent::v1::Torrent;

/// Hash of a single torrent piece. Treated as opaque bytes; equality is
/// bytewise. The length is whatever the torrent declares (20 bytes for v1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PieceHash(Vec<u8>);

impl PieceHash {
    /// Wrap raw hash bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw hash bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for PieceHash {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// One file inside a torrent, in torrent declaration order.
#[derive(Debug, Clone)]
pub struct TorrentFile {
    /// Path exactly as the torrent names it, joined with the OS separator.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Byte offset of the file within the concatenated torrent payload.
    pub offset: u64,
}

/// Parsed torrent metadata: the file listing in torrent order, the piece
/// length, and the piece hash sequence.
#[derive(Debug, Clone)]
pub struct TorrentMeta {
    name: String,
    piece_length: u64,
    pieces: Vec<PieceHash>,
    files: Vec<TorrentFile>,
    raw: Vec<u8>,
}

impl TorrentMeta {
    /// Parse a `.torrent` blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is not a valid v1 metainfo dictionary.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let torrent =
            Torrent::read_from_bytes(&bytes).context("failed to parse torrent metainfo")?;
        Self::from_torrent(torrent, bytes)
    }

    /// Parse a `.torrent` file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read torrent file {}", path.display()))?;
        Self::from_bytes(bytes)
    }

    /// Assemble metadata from already-decoded parts. Used by simulated
    /// sessions and tests; such metadata carries no raw metainfo blob.
    #[must_use]
    pub fn from_parts(
        name: impl Into<String>,
        piece_length: u64,
        pieces: Vec<PieceHash>,
        files: Vec<(String, u64)>,
    ) -> Self {
        let mut offset = 0;
        let files = files
            .into_iter()
            .map(|(path, size)| {
                let file = TorrentFile { path, size, offset };
                offset += size;
                file
            })
            .collect();
        Self {
            name: name.into(),
            piece_length,
            pieces,
            files,
            raw: Vec::new(),
        }
    }

    fn from_torrent(torrent: Torrent, raw: Vec<u8>) -> Result<Self> {
        if torrent.piece_length <= 0 {
            bail!("torrent declares non-positive piece length");
        }
        let piece_length = torrent.piece_length as u64;
        let pieces = torrent.pieces.into_iter().map(PieceHash::new).collect();

        let mut files = Vec::new();
        let mut offset = 0;
        match torrent.files {
            Some(listing) => {
                for file in listing {
                    if file.length < 0 {
                        bail!("torrent declares negative file length");
                    }
                    let size = file.length as u64;
                    files.push(TorrentFile {
                        path: torrent_path_string(&torrent.name, &file.path),
                        size,
                        offset,
                    });
                    offset += size;
                }
            }
            None => {
                if torrent.length < 0 {
                    bail!("torrent declares negative file length");
                }
                files.push(TorrentFile {
                    path: torrent.name.clone(),
                    size: torrent.length as u64,
                    offset: 0,
                });
            }
        }

        Ok(Self {
            name: torrent.name,
            piece_length,
            pieces,
            files,
            raw,
        })
    }

    /// Torrent display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared piece length in bytes.
    #[must_use]
    pub const fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Files in torrent declaration order.
    #[must_use]
    pub fn files(&self) -> &[TorrentFile] {
        &self.files
    }

    /// The full piece hash sequence.
    #[must_use]
    pub fn pieces(&self) -> &[PieceHash] {
        &self.pieces
    }

    /// The raw metainfo blob this metadata was parsed from. Empty for
    /// metadata assembled via [`TorrentMeta::from_parts`].
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Index of the file with the given torrent path.
    #[must_use]
    pub fn file_index(&self, path: &str) -> Option<usize> {
        self.files.iter().position(|file| file.path == path)
    }

    /// Piece index range `[first, last)` covering a file. Empty for
    /// zero-size files. Adjacent files may share boundary pieces; both
    /// ranges include the shared piece.
    #[must_use]
    pub fn piece_range(&self, file: &TorrentFile) -> Range<usize> {
        if file.size == 0 {
            return 0..0;
        }
        let first = (file.offset / self.piece_length) as usize;
        let last = ((file.offset + file.size - 1) / self.piece_length) as usize + 1;
        first..last
    }

    /// Piece hashes covering the named file, in piece order.
    #[must_use]
    pub fn file_hashes(&self, path: &str) -> Vec<PieceHash> {
        self.files
            .iter()
            .find(|file| file.path == path)
            .map(|file| {
                let range = self.piece_range(file);
                self.pieces
                    .get(range)
                    .map(<[PieceHash]>::to_vec)
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

/// Join the torrent name with a file's path components using the OS
/// separator, the same shape the engine reports file paths in.
fn torrent_path_string(name: &str, path: &Path) -> String {
    let mut out = String::from(name);
    for component in path.components() {
        out.push(std::path::MAIN_SEPARATOR);
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}
