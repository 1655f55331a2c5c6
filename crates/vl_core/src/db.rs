use crate::app_error::{AppError, AppResult};
use rusqlite::{Connection, OpenFlags};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

const LATEST_SCHEMA_VERSION: i64 = 2;

// Virtual machine steps between deadline checks.
const DEADLINE_CHECK_OPS: i32 = 1_000;

const MIGRATIONS: [(i64, &str); 2] = [
    (1, include_str!("../migrations/0001_entries.sql")),
    (2, include_str!("../migrations/0002_tombstones.sql")),
];

fn db_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "db", message, false, details)
}

/// Opens the ledger for writing, creating and migrating it as needed.
pub fn open_db(db_path: &Path) -> AppResult<Connection> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            db_error(
                "VL_DB_OPEN_FAILED",
                "failed to create database parent directory",
                serde_json::json!({ "error": e.to_string(), "path": parent }),
            )
        })?;
    }

    let conn = Connection::open(db_path).map_err(|e| {
        db_error(
            "VL_DB_OPEN_FAILED",
            "failed to open sqlite database",
            serde_json::json!({ "error": e.to_string(), "path": db_path }),
        )
    })?;

    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .map_err(|e| {
            db_error(
                "VL_DB_OPEN_FAILED",
                "failed to enable WAL journal mode",
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;

    apply_migrations(&conn)?;
    Ok(conn)
}

/// Opens a read-only connection for one request. `timeout` is the request
/// deadline: lock waits are bounded by it, and any statement still running
/// once it passes is interrupted and fails with a retryable `VL_QUERY_FAILED`.
pub fn open_db_readonly(db_path: &Path, timeout: Duration) -> AppResult<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        db_error(
            "VL_DB_OPEN_FAILED",
            "failed to open sqlite database read-only",
            serde_json::json!({ "error": e.to_string(), "path": db_path }),
        )
    })?;

    conn.busy_timeout(timeout).map_err(|e| {
        db_error(
            "VL_DB_OPEN_FAILED",
            "failed to set busy timeout",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;

    let current = schema_version(&conn)?;
    if current != LATEST_SCHEMA_VERSION {
        return Err(db_error(
            "VL_DB_SCHEMA_INCOMPATIBLE",
            "database schema version does not match this build",
            serde_json::json!({ "current": current, "latest": LATEST_SCHEMA_VERSION }),
        ));
    }

    install_deadline(&conn, timeout);
    Ok(conn)
}

/// Interrupts any statement on `conn` once `timeout` has elapsed from now.
pub fn install_deadline(conn: &Connection, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    conn.progress_handler(DEADLINE_CHECK_OPS, Some(move || Instant::now() >= deadline));
}

pub fn open_db_in_memory() -> AppResult<Connection> {
    let conn = Connection::open_in_memory().map_err(|e| {
        db_error(
            "VL_DB_OPEN_FAILED",
            "failed to open in-memory sqlite database",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;
    apply_migrations(&conn)?;
    Ok(conn)
}

pub fn apply_migrations(conn: &Connection) -> AppResult<()> {
    let current = schema_version(conn)?;
    if current > LATEST_SCHEMA_VERSION {
        return Err(db_error(
            "VL_DB_SCHEMA_INCOMPATIBLE",
            "database schema version is newer than supported",
            serde_json::json!({ "current": current, "latest": LATEST_SCHEMA_VERSION }),
        ));
    }

    for (version, sql) in MIGRATIONS {
        if schema_version(conn)? >= version {
            continue;
        }

        let tx = conn.unchecked_transaction().map_err(|e| {
            db_error(
                "VL_DB_MIGRATION_FAILED",
                "failed to begin migration transaction",
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;

        tx.execute_batch(sql).map_err(|e| {
            db_error(
                "VL_DB_MIGRATION_FAILED",
                &format!("failed to apply migration {:04}", version),
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;

        tx.pragma_update(None, "user_version", version)
            .map_err(|e| {
                db_error(
                    "VL_DB_MIGRATION_FAILED",
                    "failed to set schema user_version",
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;

        tx.commit().map_err(|e| {
            db_error(
                "VL_DB_MIGRATION_FAILED",
                "failed to commit migration transaction",
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> AppResult<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| {
            db_error(
                "VL_DB_SCHEMA_INCOMPATIBLE",
                "failed to read schema version",
                serde_json::json!({ "error": e.to_string() }),
            )
        })
}

pub fn latest_schema_version() -> i64 {
    LATEST_SCHEMA_VERSION
}
