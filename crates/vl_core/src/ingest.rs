use crate::app_error::{query_failed, AppError, AppResult};
use crate::archive::{archive_superseded, undo_relocation, ArchivedVersion, RetryPolicy, DEFAULT_ARCHIVE_PREFIX};
use crate::change_report::parse_changes;
use crate::ledger::{begin_write, latest_opt, record_tombstone, record_version};
use crate::object_store::BlobStore;
use crate::paths::{object_key, prefixed_key};
use crate::timestamp::now_timestamp;
use crate::types::ChangeSet;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_BACKUP_PREFIX: &str = ".sync-backup";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first file that fails. Files already processed stay committed.
    #[default]
    Abort,
    /// Record the failure and continue with the remaining files.
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Where the sync tool leaves superseded and deleted files, mirroring
    /// their live keys.
    pub backup_prefix: String,
    pub archive_prefix: String,
    pub failure_policy: FailurePolicy,
    pub retry: RetryPolicy,
    /// Recorded as the time of deletions seen in this run.
    pub run_time: String,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            backup_prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            archive_prefix: DEFAULT_ARCHIVE_PREFIX.to_string(),
            failure_policy: FailurePolicy::default(),
            retry: RetryPolicy::default(),
            run_time: now_timestamp(),
            cancel: None,
        }
    }
}

impl IngestOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Recorded,
    Tombstoned,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: String,
    pub kind: ChangeKind,
    pub action: FileAction,
    pub version: Option<i64>,
    pub archived: Option<ArchivedVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFailure {
    pub path: String,
    pub kind: ChangeKind,
    pub error: AppError,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub processed: Vec<FileOutcome>,
    pub failures: Vec<IngestFailure>,
    pub cancelled: bool,
    /// Paths left untouched by a cancelled run, for the next run to retry.
    pub remaining: Vec<String>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Classifies `report` and ingests the result. A malformed report fails
/// before the ledger is touched.
pub fn ingest_report(
    conn: &mut Connection,
    store: &dyn BlobStore,
    report: &str,
    base: &str,
    opts: &IngestOptions,
) -> AppResult<IngestReport> {
    let changes = parse_changes(report, base)?;
    ingest_change_set(conn, store, &changes, opts)
}

/// Applies one change set to the ledger, one file per transaction.
/// Modified paths go first, then deletions, then new paths.
pub fn ingest_change_set(
    conn: &mut Connection,
    store: &dyn BlobStore,
    changes: &ChangeSet,
    opts: &IngestOptions,
) -> AppResult<IngestReport> {
    let queue: Vec<(ChangeKind, &String)> = changes
        .modified
        .iter()
        .map(|p| (ChangeKind::Modified, p))
        .chain(changes.deleted.iter().map(|p| (ChangeKind::Deleted, p)))
        .chain(changes.new.iter().map(|p| (ChangeKind::New, p)))
        .collect();

    tracing::info!(
        new = changes.new.len(),
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        "starting ingestion run"
    );

    let mut report = IngestReport::default();
    for (idx, (kind, path)) in queue.iter().enumerate() {
        if opts.is_cancelled() {
            report.cancelled = true;
            report.remaining = queue[idx..].iter().map(|(_, p)| (*p).clone()).collect();
            tracing::warn!(remaining = report.remaining.len(), "ingestion run cancelled");
            break;
        }

        match ingest_one(conn, store, *kind, path, opts) {
            Ok(outcome) => {
                tracing::info!(
                    path = %outcome.path,
                    version = ?outcome.version,
                    action = ?outcome.action,
                    "ingested"
                );
                report.processed.push(outcome);
            }
            Err(err) => {
                tracing::error!(path = %path, code = %err.code, "ingest failed: {}", err.message);
                if opts.failure_policy == FailurePolicy::Abort {
                    return Err(err);
                }
                report.failures.push(IngestFailure {
                    path: (*path).clone(),
                    kind: *kind,
                    error: err,
                });
            }
        }
    }

    tracing::info!(
        processed = report.processed.len(),
        failed = report.failures.len(),
        cancelled = report.cancelled,
        "ingestion run finished"
    );
    Ok(report)
}

fn live_modified_at(store: &dyn BlobStore, path: &str) -> AppResult<String> {
    let key = object_key(path);
    store
        .stat(&key)?
        .map(|meta| meta.modified_at)
        .ok_or_else(|| {
            AppError::new(
                "VL_OBJECT_NOT_FOUND",
                "ingest",
                "live object for changed path does not exist",
                false,
                serde_json::json!({ "path": path, "key": key }),
            )
        })
}

/// Archives the live version of `path` if there is one, then appends the next
/// version. Everything happens in one write transaction; a failure anywhere
/// leaves both the ledger and the store as they were.
fn ingest_one(
    conn: &mut Connection,
    store: &dyn BlobStore,
    kind: ChangeKind,
    path: &str,
    opts: &IngestOptions,
) -> AppResult<FileOutcome> {
    let modified_at = match kind {
        ChangeKind::Deleted => None,
        ChangeKind::New | ChangeKind::Modified => Some(live_modified_at(store, path)?),
    };

    let tx = begin_write(conn)?;
    let current = latest_opt(&tx, path)?;
    let superseded = current.as_ref().filter(|entry| entry.is_live());

    if kind == ChangeKind::Deleted && superseded.is_none() {
        tracing::warn!(path, "deleted path has no live ledger entry, skipping");
        return Ok(FileOutcome {
            path: path.to_string(),
            kind,
            action: FileAction::Skipped,
            version: None,
            archived: None,
        });
    }

    let next = current.as_ref().map(|entry| entry.version + 1).unwrap_or(1);
    let source_key = prefixed_key(&opts.backup_prefix, path);
    let archived = match superseded {
        Some(entry) => Some(archive_superseded(
            store,
            &tx,
            path,
            entry.version,
            &source_key,
            &opts.archive_prefix,
            &opts.retry,
        )?),
        None => None,
    };

    let (recorded, action) = match &modified_at {
        Some(at) => (record_version(&tx, path, next, at), FileAction::Recorded),
        None => {
            // Keep the tombstone at or after the version it ends.
            let deleted_at = current
                .as_ref()
                .map(|entry| entry.modified_at.clone())
                .filter(|prev| prev.as_str() > opts.run_time.as_str())
                .unwrap_or_else(|| opts.run_time.clone());
            (record_tombstone(&tx, path, next, &deleted_at), FileAction::Tombstoned)
        }
    };

    let committed = recorded.and_then(|_| {
        tx.commit()
            .map_err(|e| query_failed("failed to commit ingest transaction", e, serde_json::json!({ "path": path })))
    });
    if let Err(mut err) = committed {
        if let Some(archived) = &archived {
            // Callers get the commit error, with any restore failure attached.
            if let Err(restore) = undo_relocation(store, archived, &source_key) {
                if let serde_json::Value::Object(map) = &mut err.details {
                    map.insert(
                        "restore_error".to_string(),
                        serde_json::json!({
                            "code": restore.code,
                            "message": restore.message,
                            "details": restore.details
                        }),
                    );
                }
            }
        }
        return Err(err);
    }

    Ok(FileOutcome {
        path: path.to_string(),
        kind,
        action,
        version: Some(next),
        archived,
    })
}
