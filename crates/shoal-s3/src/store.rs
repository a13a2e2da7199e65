//! Object store seam.
//!
//! The uploader drives a small trait rather than the AWS client directly,
//! so retry classification can be tested with injected stores and the
//! wire client stays swappable.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::Path;

use async_trait::async_trait;

/// Failure of a single object store call, carrying the HTTP status that
/// produced it. Transport-level failures that never reached the service
/// carry status `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// HTTP status code, or `0` for transport-level failures.
    pub status: u16,
    /// Human-readable failure description.
    pub message: String,
}

impl StoreError {
    /// An error observed as an HTTP response.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A transport-level failure (connection refused, timeout, ...).
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            message: message.into(),
        }
    }

    /// Whether the failure is worth retrying: throttling (HTTP 429) and
    /// transport-level failures only. Every other status is a hard error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.status == 429 || self.status == 0
    }
}

impl Display for StoreError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        if self.status == 0 {
            write!(formatter, "object store transport failure: {}", self.message)
        } else {
            write!(
                formatter,
                "object store returned HTTP {}: {}",
                self.status, self.message
            )
        }
    }
}

impl Error for StoreError {}

/// Minimal object store surface the sync pipeline needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether the configured bucket exists and is reachable.
    async fn bucket_exists(&self) -> Result<bool, StoreError>;

    /// Upload the file at `source` under `key`. The source is re-opened
    /// on every call so retries start from a fresh stream.
    async fn put_object(&self, key: &str, source: &Path) -> Result<(), StoreError>;

    /// Upload an empty object under `key`. Used by the startup probe.
    async fn put_empty(&self, key: &str) -> Result<(), StoreError>;

    /// Remove the object under `key`.
    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    /// Whether an object exists under `key`. Missing objects and missing
    /// buckets report `false` rather than an error.
    async fn object_exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// Build the object key for a relative sync path: the configured prefix
/// joined with the path, with OS backslashes normalized to `/`.
#[must_use]
pub fn object_key(prefix: &str, relative: &str) -> String {
    let relative = relative.replace('\\', "/");
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        relative
    } else {
        format!("{prefix}/{relative}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_are_429_and_transport() {
        assert!(StoreError::http(429, "slow down").is_transient());
        assert!(StoreError::transport("connection reset").is_transient());
        assert!(!StoreError::http(403, "forbidden").is_transient());
        assert!(!StoreError::http(500, "boom").is_transient());
    }

    #[test]
    fn object_keys_join_prefix_and_normalize_separators() {
        assert_eq!(object_key("", "a/b.bin"), "a/b.bin");
        assert_eq!(object_key("backups", "a/b.bin"), "backups/a/b.bin");
        assert_eq!(object_key("backups/", "a\\b.bin"), "backups/a/b.bin");
    }
}
