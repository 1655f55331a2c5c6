use crate::app_error::{AppError, AppResult};
use crate::hashing::archive_key_from_reader;
use crate::ledger::mark_archived;
use crate::object_store::BlobStore;
use crate::types::{ArchiveKey, VersionEntry};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ARCHIVE_PREFIX: &str = "archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 50,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Backoff grows linearly with the attempt number.
    pub fn run<T>(&self, what: &str, key: &str, mut op: impl FnMut() -> AppResult<T>) -> AppResult<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(err) if err.retryable && attempt < attempts => {
                    tracing::warn!(
                        key,
                        attempt,
                        code = %err.code,
                        "{} failed, retrying",
                        what
                    );
                    std::thread::sleep(Duration::from_millis(self.backoff_ms * attempt as u64));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedVersion {
    pub path: String,
    pub version: i64,
    pub archive_key: ArchiveKey,
    pub archive_object: String,
}

pub fn archive_object_key(archive_prefix: &str, key: &ArchiveKey) -> String {
    let prefix = archive_prefix.trim_matches('/');
    if prefix.is_empty() {
        key.0.clone()
    } else {
        format!("{}/{}", prefix, key.0)
    }
}

fn archive_io_error(message: &str, path: &str, cause: &AppError) -> AppError {
    AppError::new(
        "VL_ARCHIVE_IO_FAILED",
        "archive",
        message,
        cause.retryable,
        serde_json::json!({
            "path": path,
            "cause_code": cause.code,
            "cause": cause.message,
            "cause_details": cause.details
        }),
    )
}

/// Streams the bytes at `source_key` through the archive hash for
/// `(path, version)`.
pub fn compute_archive_key(
    store: &dyn BlobStore,
    source_key: &str,
    path: &str,
    version: i64,
    retry: &RetryPolicy,
) -> AppResult<ArchiveKey> {
    retry
        .run("archive hashing", source_key, || {
            let mut reader = store.open(source_key)?;
            archive_key_from_reader(path, version, &mut reader).map_err(|e| {
                crate::object_store::store_io_error("failed streaming object for hashing", &e, source_key)
            })
        })
        .map_err(|e| archive_io_error("failed hashing superseded content", path, &e))
}

/// Moves the superseded bytes of `(path, version)` from `source_key` into the
/// archive area and records the key on that ledger row.
///
/// `conn` must be the caller's open write transaction: the ledger update is
/// applied before the relocation, so a relocation failure returns an error
/// and the caller's rollback discards the update. If the caller's commit fails
/// after this returns, it must call [`undo_relocation`].
pub fn archive_superseded(
    store: &dyn BlobStore,
    conn: &Connection,
    path: &str,
    version: i64,
    source_key: &str,
    archive_prefix: &str,
    retry: &RetryPolicy,
) -> AppResult<ArchivedVersion> {
    let key = compute_archive_key(store, source_key, path, version, retry)?;
    mark_archived(conn, path, version, &key)?;

    let archive_object = archive_object_key(archive_prefix, &key);
    retry
        .run("archive relocation", source_key, || store.rename(source_key, &archive_object))
        .map_err(|e| archive_io_error("failed relocating superseded content", path, &e))?;

    tracing::debug!(path, version, archive_key = %key.0, "archived superseded version");
    Ok(ArchivedVersion {
        path: path.to_string(),
        version,
        archive_key: key,
        archive_object,
    })
}

/// Puts relocated bytes back where they came from.
pub fn undo_relocation(store: &dyn BlobStore, archived: &ArchivedVersion, source_key: &str) -> AppResult<()> {
    store.rename(&archived.archive_object, source_key).map_err(|e| {
        tracing::error!(
            path = %archived.path,
            archive_object = %archived.archive_object,
            "failed to restore relocated content after ledger rollback"
        );
        archive_io_error("failed restoring relocated content", &archived.path, &e)
    })
}

/// Recomputes the archive key from the archived bytes of `entry`.
pub fn verify_archive(store: &dyn BlobStore, archive_prefix: &str, entry: &VersionEntry) -> AppResult<bool> {
    let Some(key) = &entry.archive_key else {
        return Err(AppError::new(
            "VL_LEDGER_NOT_FOUND",
            "ledger",
            "entry has no archive key",
            false,
            serde_json::json!({ "path": entry.path, "version": entry.version }),
        ));
    };
    let object = archive_object_key(archive_prefix, key);
    let recomputed = compute_archive_key(store, &object, &entry.path, entry.version, &RetryPolicy::none())?;
    Ok(&recomputed == key)
}
