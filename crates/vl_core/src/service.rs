use crate::app_error::{AppError, AppResult};
use crate::change_report::parse_changes;
use crate::db::{open_db, open_db_readonly};
use crate::diff::{compare, DiffMode};
use crate::ingest::{ingest_change_set, IngestOptions, IngestReport};
use crate::ledger;
use crate::object_store::BlobStore;
use crate::paths::{base_name, directory_prefix, normalize_path, object_key};
use crate::reconstruct::{content_key, reconstruct_at, ListingScope};
use crate::types::{ChangeSet, DiffItem, VersionEntry};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One file version as handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlMode {
    #[default]
    Omit,
    WithUrls,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub archive_prefix: String,
    pub backup_prefix: String,
    pub presign_ttl: Duration,
    pub query_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            archive_prefix: crate::archive::DEFAULT_ARCHIVE_PREFIX.to_string(),
            backup_prefix: crate::ingest::DEFAULT_BACKUP_PREFIX.to_string(),
            presign_ttl: Duration::from_secs(3600),
            query_timeout: Duration::from_millis(5000),
        }
    }
}

impl From<&crate::config::LoadedConfig> for ServiceOptions {
    fn from(loaded: &crate::config::LoadedConfig) -> Self {
        Self {
            archive_prefix: loaded.config.archive_prefix.clone(),
            backup_prefix: loaded.config.backup_prefix.clone(),
            presign_ttl: loaded.presign_ttl(),
            query_timeout: loaded.query_timeout(),
        }
    }
}

/// Entry points used by the surrounding service. Every query runs on its own
/// read-only connection.
pub struct VersionService {
    db_path: PathBuf,
    store: Arc<dyn BlobStore>,
    opts: ServiceOptions,
}

impl VersionService {
    pub fn new(db_path: PathBuf, store: Arc<dyn BlobStore>, opts: ServiceOptions) -> Self {
        Self {
            db_path,
            store,
            opts,
        }
    }

    pub fn from_config(loaded: &crate::config::LoadedConfig) -> Self {
        Self::new(loaded.db_path(), loaded.build_store(), ServiceOptions::from(loaded))
    }

    fn reader(&self) -> AppResult<Connection> {
        open_db_readonly(&self.db_path, self.opts.query_timeout)
    }

    fn url_for(&self, key: &str, path: &str) -> AppResult<String> {
        self.store
            .presigned_url(key, base_name(path), self.opts.presign_ttl)
    }

    fn to_entry(&self, info: &VersionEntry, urls: UrlMode) -> AppResult<Entry> {
        let url = match urls {
            UrlMode::WithUrls => Some(self.url_for(&content_key(info, &self.opts.archive_prefix), &info.path)?),
            UrlMode::Omit => None,
        };
        Ok(Entry {
            path: info.path.clone(),
            version: Some(info.version),
            modified_at: Some(info.modified_at.clone()),
            url,
        })
    }

    fn live_or_not_found(entry: VersionEntry) -> AppResult<VersionEntry> {
        if entry.deleted {
            return Err(AppError::new(
                "VL_LEDGER_NOT_FOUND",
                "ledger",
                "path was deleted in this version",
                false,
                serde_json::json!({ "path": entry.path, "version": entry.version }),
            ));
        }
        Ok(entry)
    }

    /// Latest version of a file, with a download URL.
    pub fn get_latest(&self, path: &str) -> AppResult<Entry> {
        let conn = self.reader()?;
        let entry = Self::live_or_not_found(ledger::latest(&conn, &normalize_path(path))?)?;
        self.to_entry(&entry, UrlMode::WithUrls)
    }

    pub fn get_version(&self, path: &str, version: i64) -> AppResult<Entry> {
        let conn = self.reader()?;
        let entry = Self::live_or_not_found(ledger::get_version(&conn, &normalize_path(path), version)?)?;
        self.to_entry(&entry, UrlMode::WithUrls)
    }

    pub fn get_at_time(&self, path: &str, as_of: &str) -> AppResult<Entry> {
        let conn = self.reader()?;
        let entry = ledger::version_at_time(&conn, &normalize_path(path), as_of)?;
        self.to_entry(&entry, UrlMode::WithUrls)
    }

    /// Version history, newest first, without URLs. Unknown paths give an
    /// empty list.
    pub fn get_history(&self, path: &str) -> AppResult<Vec<Entry>> {
        let conn = self.reader()?;
        ledger::history(&conn, &normalize_path(path))?
            .iter()
            .map(|e| self.to_entry(e, UrlMode::Omit))
            .collect()
    }

    fn is_internal_key(&self, key: &str) -> bool {
        [&self.opts.archive_prefix, &self.opts.backup_prefix]
            .iter()
            .map(|p| p.trim_matches('/'))
            .any(|p| key == p || key.starts_with(&format!("{}/", p)))
    }

    /// Live listing of a directory straight from the store: direct children,
    /// no zero-size folder markers.
    pub fn get_listing(&self, dir: &str, urls: UrlMode) -> AppResult<Vec<Entry>> {
        let prefix = object_key(&directory_prefix(dir));
        let listing = self.store.list(&prefix)?;

        let mut out = Vec::new();
        for obj in listing {
            if obj.size_bytes == 0 || obj.key == prefix || self.is_internal_key(&obj.key) {
                continue;
            }
            let rest = &obj.key[prefix.len()..];
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            let path = normalize_path(&obj.key);
            let url = match urls {
                UrlMode::WithUrls => Some(self.url_for(&obj.key, &path)?),
                UrlMode::Omit => None,
            };
            out.push(Entry {
                path,
                version: None,
                modified_at: None,
                url,
            });
        }

        if out.is_empty() {
            return Err(AppError::new(
                "VL_NO_RESULTS",
                "query",
                "empty or non-existent directory",
                false,
                serde_json::json!({ "path": dir }),
            ));
        }
        Ok(out)
    }

    /// Directory as it was at `as_of`, from the ledger.
    pub fn get_past(&self, dir: &str, as_of: &str, urls: UrlMode) -> AppResult<Vec<Entry>> {
        let conn = self.reader()?;
        reconstruct_at(&conn, dir, as_of, ListingScope::Children)?
            .values()
            .map(|e| self.to_entry(e, urls))
            .collect()
    }

    pub fn compare(&self, dir: &str, t0: &str, t1: &str, mode: DiffMode) -> AppResult<Vec<DiffItem>> {
        let conn = self.reader()?;
        compare(&conn, dir, t0, t1, mode)
    }

    pub fn ingest_changes(&self, changes: &ChangeSet, opts: &IngestOptions) -> AppResult<IngestReport> {
        let mut conn = open_db(&self.db_path)?;
        ingest_change_set(&mut conn, self.store.as_ref(), changes, opts)
    }

    pub fn ingest_report(&self, report: &str, base: &str, opts: &IngestOptions) -> AppResult<IngestReport> {
        let changes = parse_changes(report, base)?;
        self.ingest_changes(&changes, opts)
    }
}
