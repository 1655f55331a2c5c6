use crate::app_error::{query_failed, AppError, AppResult};
use crate::archive::archive_object_key;
use crate::ledger::row_to_entry;
use crate::paths::{directory_prefix, object_key};
use crate::timestamp::canonical_query_time;
use crate::types::{Snapshot, VersionEntry};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingScope {
    /// Direct children of the directory only, like an object-store listing.
    #[default]
    Children,
    Recursive,
}

// As-of join: the highest version per path among rows modified at or before
// the query time. Prefix matching uses substr so no LIKE escaping is needed.
const AS_OF_SQL: &str = "SELECT e.PathName, e.VersionNum, e.DateModified, e.ArchiveKey, e.Deleted
     FROM entries AS e
     INNER JOIN (
       SELECT PathName, MAX(VersionNum) AS VersionNum
       FROM entries
       WHERE substr(PathName, 1, length(?1)) = ?1
         AND DateModified <= ?2
       GROUP BY PathName
     ) AS latest
       ON latest.PathName = e.PathName
      AND latest.VersionNum = e.VersionNum
     ORDER BY e.PathName";

fn is_direct_child(prefix: &str, path: &str) -> bool {
    path.strip_prefix(prefix)
        .map(|rest| !rest.is_empty() && !rest.contains('/'))
        .unwrap_or(false)
}

/// Reconstructs the state of directory `prefix` at `as_of`: for every path
/// under it, the entry in effect at that time. Paths whose entry in effect is
/// a tombstone were deleted and are left out.
pub fn reconstruct_at(
    conn: &Connection,
    prefix: &str,
    as_of: &str,
    scope: ListingScope,
) -> AppResult<BTreeMap<String, VersionEntry>> {
    let cutoff = canonical_query_time(as_of)?;
    let prefix = directory_prefix(prefix);

    let mut stmt = conn.prepare_cached(AS_OF_SQL).map_err(|e| {
        query_failed(
            "failed preparing reconstruction query",
            e,
            serde_json::json!({ "prefix": prefix, "as_of": as_of }),
        )
    })?;
    let rows = stmt
        .query_map(params![prefix, cutoff], row_to_entry)
        .map_err(|e| {
            query_failed(
                "failed running reconstruction query",
                e,
                serde_json::json!({ "prefix": prefix, "as_of": as_of }),
            )
        })?;

    let mut out = BTreeMap::new();
    for row in rows {
        let entry = row.map_err(|e| {
            query_failed(
                "failed decoding reconstruction row",
                e,
                serde_json::json!({ "prefix": prefix, "as_of": as_of }),
            )
        })?;
        if entry.deleted {
            continue;
        }
        if scope == ListingScope::Children && !is_direct_child(&prefix, &entry.path) {
            continue;
        }
        out.insert(entry.path.clone(), entry);
    }

    if out.is_empty() {
        return Err(AppError::new(
            "VL_NO_RESULTS_AT_TIME",
            "query",
            "no files under this path at this time",
            false,
            serde_json::json!({ "prefix": prefix, "as_of": as_of }),
        ));
    }
    Ok(out)
}

/// Path -> version reduction of [`reconstruct_at`].
pub fn snapshot_at(conn: &Connection, prefix: &str, as_of: &str, scope: ListingScope) -> AppResult<Snapshot> {
    Ok(reconstruct_at(conn, prefix, as_of, scope)?
        .into_iter()
        .map(|(path, entry)| (path, entry.version))
        .collect())
}

/// Object-store key holding the bytes of `entry`.
pub fn content_key(entry: &VersionEntry, archive_prefix: &str) -> String {
    match &entry.archive_key {
        Some(key) => archive_object_key(archive_prefix, key),
        None => object_key(&entry.path),
    }
}
