#![forbid(unsafe_code)]
#![deny(clippy::all, rustdoc::broken_intra_doc_links)]

//! S3-compatible object storage for Shoal: the store seam, the AWS SDK
//! implementation, and the parallel upload worker pool.

pub mod aws;
pub mod backoff;
pub mod store;
pub mod uploader;

pub use aws::{AwsObjectStore, S3Config};
pub use backoff::{BackoffPolicy, retry};
pub use store::{ObjectStore, StoreError, object_key};
pub use uploader::{S3Uploader, UploadEvent, UploadJob, UploaderOptions};
