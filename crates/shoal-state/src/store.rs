//! SQLite-backed bookkeeping of file lifecycle status and the persisted
//! hashlist.
//!
//! The store is not internally synchronized; the orchestrator is the only
//! writer and accesses it sequentially. Piece hashes carry an explicit
//! ordinal column so read-back order never depends on the storage engine:
//! adjacent torrent files can share a boundary piece, which also rules the
//! hash itself out as a key.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use shoal_torrent::{FileHashRecord, Hashlist};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;

use crate::error::{Result, StateError};

/// Lifecycle status of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Local presence is expected; the upload is pending or in progress.
    Uploading,
    /// Upload succeeded; no local copy is required.
    Ready,
}

impl FileStatus {
    const fn as_i64(self) -> i64 {
        match self {
            Self::Uploading => 0,
            Self::Ready => 1,
        }
    }

    fn from_i64(value: i64, path: &str) -> Result<Self> {
        match value {
            0 => Ok(Self::Uploading),
            1 => Ok(Self::Ready),
            other => Err(StateError::InvalidStatus {
                value: other,
                path: path.to_string(),
            }),
        }
    }
}

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tracked_files (
        path TEXT PRIMARY KEY,
        parent TEXT,
        status INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS piece_hashes (
        file TEXT NOT NULL,
        seq INTEGER NOT NULL,
        hash BLOB NOT NULL,
        PRIMARY KEY (file, seq)
    )",
    "CREATE TABLE IF NOT EXISTS hashlist_links (
        child TEXT PRIMARY KEY,
        parent TEXT NOT NULL
    )",
];

const DROP_TABLES: &[&str] = &[
    "DROP TABLE IF EXISTS tracked_files",
    "DROP TABLE IF EXISTS piece_hashes",
    "DROP TABLE IF EXISTS hashlist_links",
];

fn query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StateError {
    move |source| StateError::QueryFailed { operation, source }
}

/// Durable application state backed by a single SQLite database.
#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
}

impl AppState {
    /// Open (creating if missing) the state database at `path`. With
    /// `reset` the tables are dropped and recreated atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path, reset: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| StateError::OpenFailed {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), reset, "opened state database");
        Self::init(pool, reset).await
    }

    /// Open a fresh in-memory database. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|source| {
            StateError::OpenFailed {
                path: ":memory:".into(),
                source,
            }
        })?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|source| StateError::OpenFailed {
                path: ":memory:".into(),
                source,
            })?;
        Self::init(pool, false).await
    }

    async fn init(pool: SqlitePool, reset: bool) -> Result<Self> {
        let mut tx = pool.begin().await.map_err(query_err("begin schema init"))?;
        if reset {
            for statement in DROP_TABLES {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_err("drop tables"))?;
            }
        }
        for statement in CREATE_TABLES {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(query_err("create tables"))?;
        }
        tx.commit().await.map_err(query_err("commit schema init"))?;
        Ok(Self { pool })
    }

    /// Record a downloaded file and its extracted children as Uploading.
    ///
    /// Existing children of `path` are discarded first, so re-extraction
    /// after a re-download replaces the previous child set wholesale. A
    /// child already tracked under a different parent is rebound to this
    /// one with its status reset to Uploading.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn add_uploading(&self, path: &str, children: &[String]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_err("begin add uploading"))?;
        sqlx::query("DELETE FROM tracked_files WHERE parent = ?1")
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(query_err("clear previous children"))?;
        sqlx::query(
            "INSERT INTO tracked_files (path, parent, status) VALUES (?1, NULL, ?2)
             ON CONFLICT(path) DO UPDATE SET parent = NULL, status = excluded.status",
        )
        .bind(path)
        .bind(FileStatus::Uploading.as_i64())
        .execute(&mut *tx)
        .await
        .map_err(query_err("insert uploading parent"))?;
        for child in children {
            sqlx::query(
                "INSERT INTO tracked_files (path, parent, status) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET parent = excluded.parent, status = excluded.status",
            )
            .bind(child)
            .bind(path)
            .bind(FileStatus::Uploading.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(query_err("insert uploading child"))?;
        }
        tx.commit().await.map_err(query_err("commit add uploading"))
    }

    /// Mark a tracked file as Ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_ready(&self, path: &str) -> Result<()> {
        self.set_status(path, FileStatus::Ready, "mark ready").await
    }

    /// Demote a tracked file back to Uploading. Used for files whose
    /// upload failed, so a later run does not skip them as finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_uploading(&self, path: &str) -> Result<()> {
        self.set_status(path, FileStatus::Uploading, "mark uploading")
            .await
    }

    async fn set_status(
        &self,
        path: &str,
        status: FileStatus,
        operation: &'static str,
    ) -> Result<()> {
        sqlx::query("UPDATE tracked_files SET status = ?1 WHERE path = ?2")
            .bind(status.as_i64())
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(query_err(operation))?;
        Ok(())
    }

    /// Status of a tracked file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored value is corrupt.
    pub async fn get_status(&self, path: &str) -> Result<Option<FileStatus>> {
        let row = sqlx::query("SELECT status FROM tracked_files WHERE path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err("get status"))?;
        row.map(|row| {
            let value: i64 = row
                .try_get("status")
                .map_err(query_err("decode status"))?;
            FileStatus::from_i64(value, path)
        })
        .transpose()
    }

    /// The file's parent, but only while the parent row itself is still
    /// Uploading.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_uploading_parent(&self, path: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT p.path FROM tracked_files c
             JOIN tracked_files p ON p.path = c.parent
             WHERE c.path = ?1 AND p.status = ?2",
        )
        .bind(path)
        .bind(FileStatus::Uploading.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err("get uploading parent"))?;
        row.map(|row| row.try_get("path").map_err(query_err("decode parent")))
            .transpose()
    }

    /// Files currently Uploading, grouped parent → children. Parentless
    /// rows appear as keys with empty child lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_uploading_files(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.files_with_status(FileStatus::Uploading, "get uploading files")
            .await
    }

    /// Files marked Ready, grouped parent → children.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_completed_files(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.files_with_status(FileStatus::Ready, "get completed files")
            .await
    }

    async fn files_with_status(
        &self,
        status: FileStatus,
        operation: &'static str,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let rows =
            sqlx::query("SELECT path, parent FROM tracked_files WHERE status = ?1 ORDER BY path")
                .bind(status.as_i64())
                .fetch_all(&self.pool)
                .await
                .map_err(query_err(operation))?;
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let path: String = row.try_get("path").map_err(query_err(operation))?;
            let parent: Option<String> = row.try_get("parent").map_err(query_err(operation))?;
            match parent {
                Some(parent) => grouped.entry(parent).or_default().push(path),
                None => {
                    grouped.entry(path).or_default();
                }
            }
        }
        Ok(grouped)
    }

    /// Replace the persisted hashlist in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn save_hashlist(&self, hashlist: &Hashlist) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_err("begin save hashlist"))?;
        sqlx::query("DELETE FROM piece_hashes")
            .execute(&mut *tx)
            .await
            .map_err(query_err("truncate piece hashes"))?;
        sqlx::query("DELETE FROM hashlist_links")
            .execute(&mut *tx)
            .await
            .map_err(query_err("truncate hashlist links"))?;
        for (path, record) in hashlist.iter() {
            for (seq, hash) in record.hashes.iter().enumerate() {
                sqlx::query("INSERT INTO piece_hashes (file, seq, hash) VALUES (?1, ?2, ?3)")
                    .bind(path)
                    .bind(seq as i64)
                    .bind(hash.as_bytes())
                    .execute(&mut *tx)
                    .await
                    .map_err(query_err("insert piece hash"))?;
            }
            for child in &record.linked {
                sqlx::query(
                    "INSERT INTO hashlist_links (child, parent) VALUES (?1, ?2)
                     ON CONFLICT(child) DO UPDATE SET parent = excluded.parent",
                )
                .bind(child)
                .bind(path)
                .execute(&mut *tx)
                .await
                .map_err(query_err("insert hashlist link"))?;
            }
        }
        tx.commit().await.map_err(query_err("commit save hashlist"))
    }

    /// Reconstruct the persisted hashlist. Piece order within a file is
    /// restored from the ordinal column.
    ///
    /// # Errors
    ///
    /// Returns an error if the queries fail.
    pub async fn get_hashlist(&self) -> Result<Hashlist> {
        let rows = sqlx::query("SELECT file, hash FROM piece_hashes ORDER BY file, seq")
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("load piece hashes"))?;
        let mut records: BTreeMap<String, FileHashRecord> = BTreeMap::new();
        for row in rows {
            let file: String = row.try_get("file").map_err(query_err("decode piece row"))?;
            let hash: Vec<u8> = row.try_get("hash").map_err(query_err("decode piece row"))?;
            records.entry(file).or_default().hashes.push(hash.into());
        }

        let links = sqlx::query("SELECT child, parent FROM hashlist_links")
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("load hashlist links"))?;
        for row in links {
            let child: String = row.try_get("child").map_err(query_err("decode link row"))?;
            let parent: String = row.try_get("parent").map_err(query_err("decode link row"))?;
            records.entry(parent).or_default().linked.insert(child);
        }

        let mut hashlist = Hashlist::new();
        for (path, record) in records {
            hashlist.insert(path, record);
        }
        Ok(hashlist)
    }
}
