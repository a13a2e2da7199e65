#![forbid(unsafe_code)]
#![deny(clippy::all, rustdoc::broken_intra_doc_links)]

//! Durable sync bookkeeping for Shoal: tracked file lifecycle rows and the
//! persisted piece hashlist, in a single SQLite database.

pub mod error;
pub mod store;

pub use error::{Result as StateResult, StateError};
pub use store::{AppState, FileStatus};
