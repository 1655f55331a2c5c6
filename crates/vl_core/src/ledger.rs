use crate::app_error::{query_failed, AppError, AppResult};
use crate::types::{ArchiveKey, VersionEntry};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

const ENTRY_COLUMNS: &str = "PathName, VersionNum, DateModified, ArchiveKey, Deleted";

fn ledger_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "ledger", message, false, details)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub(crate) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<VersionEntry> {
    Ok(VersionEntry {
        path: row.get(0)?,
        version: row.get(1)?,
        modified_at: row.get(2)?,
        archive_key: row.get::<_, Option<String>>(3)?.map(ArchiveKey),
        deleted: row.get::<_, i64>(4)? != 0,
    })
}

/// Starts the per-file write transaction. IMMEDIATE takes the database write
/// lock before the max-version read, so the read and the following insert
/// cannot interleave with another writer.
pub fn begin_write(conn: &mut Connection) -> AppResult<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| query_failed("failed to begin ledger write transaction", e, serde_json::json!({})))
}

pub fn current_version(conn: &Connection, path: &str) -> AppResult<Option<i64>> {
    conn.query_row(
        "SELECT MAX(VersionNum) FROM entries WHERE PathName=?1",
        params![path],
        |row| row.get::<_, Option<i64>>(0),
    )
    .map_err(|e| query_failed("failed to read current version", e, serde_json::json!({ "path": path })))
}

/// `1 + max(version)` over every row for `path`, archived or not.
pub fn next_version(conn: &Connection, path: &str) -> AppResult<i64> {
    Ok(current_version(conn, path)?.map(|v| v + 1).unwrap_or(1))
}

fn insert_row(
    conn: &Connection,
    path: &str,
    version: i64,
    modified_at: &str,
    deleted: bool,
) -> AppResult<()> {
    let expected = next_version(conn, path)?;
    if version < expected {
        return Err(ledger_error(
            "VL_LEDGER_DUPLICATE_VERSION",
            "version already recorded for path",
            serde_json::json!({ "path": path, "version": version }),
        ));
    }
    if version != expected {
        return Err(ledger_error(
            "VL_LEDGER_VERSION_GAP",
            "version must directly follow the current version",
            serde_json::json!({ "path": path, "version": version, "expected": expected }),
        ));
    }

    conn.execute(
        "INSERT INTO entries (PathName, VersionNum, DateModified, ArchiveKey, Deleted)
         VALUES (?1, ?2, ?3, NULL, ?4)",
        params![path, version, modified_at, deleted as i64],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            ledger_error(
                "VL_LEDGER_DUPLICATE_VERSION",
                "version already recorded for path",
                serde_json::json!({ "path": path, "version": version, "error": e.to_string() }),
            )
        } else {
            query_failed(
                "failed to insert ledger entry",
                e,
                serde_json::json!({ "path": path, "version": version }),
            )
        }
    })?;
    Ok(())
}

/// Inserts a live row for `(path, version)` with no archive key.
pub fn record_version(conn: &Connection, path: &str, version: i64, modified_at: &str) -> AppResult<()> {
    insert_row(conn, path, version, modified_at, false)
}

/// Inserts a tombstone row marking `path` as deleted from `deleted_at` on.
pub fn record_tombstone(conn: &Connection, path: &str, version: i64, deleted_at: &str) -> AppResult<()> {
    insert_row(conn, path, version, deleted_at, true)
}

/// Reads the max version and inserts the next one in a single IMMEDIATE
/// transaction. Returns the recorded version.
pub fn record_next_version(conn: &mut Connection, path: &str, modified_at: &str) -> AppResult<i64> {
    let tx = begin_write(conn)?;
    let version = next_version(&tx, path)?;
    record_version(&tx, path, version, modified_at)?;
    tx.commit()
        .map_err(|e| query_failed("failed to commit ledger entry", e, serde_json::json!({ "path": path })))?;
    Ok(version)
}

/// Sets the archive key of an existing row. Never overwrites a key that is
/// already present, even with the same value.
pub fn mark_archived(conn: &Connection, path: &str, version: i64, key: &ArchiveKey) -> AppResult<()> {
    let existing = get_version_opt(conn, path, version)?;
    let Some(entry) = existing else {
        return Err(ledger_error(
            "VL_LEDGER_NOT_FOUND",
            "no ledger entry for path and version",
            serde_json::json!({ "path": path, "version": version }),
        ));
    };
    if entry.deleted {
        return Err(ledger_error(
            "VL_LEDGER_TOMBSTONE",
            "tombstone entries hold no bytes to archive",
            serde_json::json!({ "path": path, "version": version }),
        ));
    }
    if let Some(current) = entry.archive_key {
        return Err(ledger_error(
            "VL_LEDGER_ALREADY_ARCHIVED",
            "ledger entry already carries an archive key",
            serde_json::json!({
                "path": path,
                "version": version,
                "archive_key": current.0,
                "requested": key.0
            }),
        ));
    }

    let updated = conn
        .execute(
            "UPDATE entries SET ArchiveKey=?1 WHERE PathName=?2 AND VersionNum=?3 AND ArchiveKey IS NULL",
            params![key.0, path, version],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ledger_error(
                    "VL_LEDGER_DUPLICATE_ARCHIVE_KEY",
                    "archive key already assigned to another entry",
                    serde_json::json!({ "path": path, "version": version, "archive_key": key.0 }),
                )
            } else {
                query_failed(
                    "failed to set archive key",
                    e,
                    serde_json::json!({ "path": path, "version": version }),
                )
            }
        })?;
    if updated != 1 {
        return Err(AppError::internal("archive key update touched an unexpected number of rows"));
    }
    Ok(())
}

/// All rows for `path`, newest first. Unknown paths yield an empty history.
pub fn history(conn: &Connection, path: &str) -> AppResult<Vec<VersionEntry>> {
    let sql = format!(
        "SELECT {} FROM entries WHERE PathName=?1 ORDER BY VersionNum DESC",
        ENTRY_COLUMNS
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| query_failed("failed preparing history query", e, serde_json::json!({ "path": path })))?;
    let rows = stmt
        .query_map(params![path], row_to_entry)
        .map_err(|e| query_failed("failed querying history", e, serde_json::json!({ "path": path })))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| {
            query_failed("failed decoding history row", e, serde_json::json!({ "path": path }))
        })?);
    }
    Ok(out)
}

fn get_version_opt(conn: &Connection, path: &str, version: i64) -> AppResult<Option<VersionEntry>> {
    let sql = format!(
        "SELECT {} FROM entries WHERE PathName=?1 AND VersionNum=?2",
        ENTRY_COLUMNS
    );
    conn.query_row(&sql, params![path, version], row_to_entry)
        .optional()
        .map_err(|e| {
            query_failed(
                "failed reading ledger entry",
                e,
                serde_json::json!({ "path": path, "version": version }),
            )
        })
}

pub fn get_version(conn: &Connection, path: &str, version: i64) -> AppResult<VersionEntry> {
    get_version_opt(conn, path, version)?.ok_or_else(|| {
        ledger_error(
            "VL_LEDGER_NOT_FOUND",
            "no ledger entry for path and version",
            serde_json::json!({ "path": path, "version": version }),
        )
    })
}

/// Highest version of `path`, tombstones included, if the path is known.
pub fn latest_opt(conn: &Connection, path: &str) -> AppResult<Option<VersionEntry>> {
    let sql = format!(
        "SELECT {} FROM entries WHERE PathName=?1 ORDER BY VersionNum DESC LIMIT 1",
        ENTRY_COLUMNS
    );
    conn.query_row(&sql, params![path], row_to_entry)
        .optional()
        .map_err(|e| query_failed("failed reading latest entry", e, serde_json::json!({ "path": path })))
}

pub fn latest(conn: &Connection, path: &str) -> AppResult<VersionEntry> {
    latest_opt(conn, path)?.ok_or_else(|| {
        ledger_error(
            "VL_LEDGER_NOT_FOUND",
            "no ledger entries for path",
            serde_json::json!({ "path": path }),
        )
    })
}

/// The version of `path` in effect at `as_of`: the highest version whose
/// modification time is at or before it. A tombstone in effect counts as no
/// result.
pub fn version_at_time(conn: &Connection, path: &str, as_of: &str) -> AppResult<VersionEntry> {
    let cutoff = crate::timestamp::canonical_query_time(as_of)?;
    let sql = format!(
        "SELECT {} FROM entries WHERE PathName=?1 AND DateModified <= ?2
         ORDER BY VersionNum DESC LIMIT 1",
        ENTRY_COLUMNS
    );
    let found = conn
        .query_row(&sql, params![path, cutoff], row_to_entry)
        .optional()
        .map_err(|e| {
            query_failed(
                "failed reading entry at time",
                e,
                serde_json::json!({ "path": path, "as_of": as_of }),
            )
        })?;
    match found {
        Some(entry) if !entry.deleted => Ok(entry),
        _ => Err(AppError::new(
            "VL_NO_RESULTS_AT_TIME",
            "query",
            "no version of path at this time",
            false,
            serde_json::json!({ "path": path, "as_of": as_of }),
        )),
    }
}

pub fn count_entries(conn: &Connection) -> AppResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
        .map_err(|e| query_failed("failed counting ledger entries", e, serde_json::json!({})))
}
