#![forbid(unsafe_code)]
#![deny(clippy::all, rustdoc::broken_intra_doc_links)]

//! Torrent metadata, piece hashlists, and the swarm download worker.

pub mod downloader;
pub mod hashlist;
pub mod magnet;
pub mod metainfo;
pub mod session;

pub use downloader::{DownloadEvent, TorrentDownloader};
pub use hashlist::{FileHashRecord, Hashlist, diff_removed, diff_updated};
pub use metainfo::{PieceHash, TorrentFile, TorrentMeta};
pub use session::{SessionAlert, StubSession, SwarmSession, create_session};
