use crate::app_error::AppResult;
use crate::reconstruct::{snapshot_at, ListingScope};
use crate::types::{DiffItem, DiffTag, Snapshot};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Every path present at the later time, tagged against the earlier one.
    /// Paths gone by the later time are not reported.
    #[default]
    AsOfLater,
    /// As `AsOfLater`, plus `Removed` for paths only present at the earlier time.
    Symmetric,
}

pub fn diff_snapshots(before: &Snapshot, after: &Snapshot, mode: DiffMode) -> Vec<DiffItem> {
    let mut out: Vec<DiffItem> = after
        .iter()
        .map(|(path, version)| {
            let tag = match before.get(path) {
                None => DiffTag::Added,
                Some(prev) if prev != version => DiffTag::Updated,
                Some(_) => DiffTag::Unchanged,
            };
            DiffItem {
                path: path.clone(),
                tag,
            }
        })
        .collect();

    if mode == DiffMode::Symmetric {
        out.extend(
            before
                .keys()
                .filter(|path| !after.contains_key(*path))
                .map(|path| DiffItem {
                    path: path.clone(),
                    tag: DiffTag::Removed,
                }),
        );
        out.sort_by(|a, b| a.path.cmp(&b.path));
    }
    out
}

/// Compares directory `prefix` at `t0` against `t1`. If either side cannot be
/// reconstructed the whole comparison fails.
pub fn compare(
    conn: &Connection,
    prefix: &str,
    t0: &str,
    t1: &str,
    mode: DiffMode,
) -> AppResult<Vec<DiffItem>> {
    let before = snapshot_at(conn, prefix, t0, ListingScope::Children)?;
    let after = snapshot_at(conn, prefix, t1, ListingScope::Children)?;
    Ok(diff_snapshots(&before, &after, mode))
}
