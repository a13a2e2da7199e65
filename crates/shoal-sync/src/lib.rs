#![forbid(unsafe_code)]
#![deny(clippy::all, rustdoc::broken_intra_doc_links)]

//! The synchronization core: size-bounded admission of torrent files
//! into the download pipeline and the orchestrator that couples
//! downloading, archive expansion, uploading, and durable bookkeeping.

pub mod admission;
pub mod engine;

pub use admission::AdmissionState;
pub use engine::{FileUploadError, SyncEngine, SyncOptions, SyncReport};
