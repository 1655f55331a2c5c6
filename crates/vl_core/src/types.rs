use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveKey(pub String);

/// One ledger row: a single version of a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub path: String,
    pub version: i64,
    pub modified_at: String,
    pub archive_key: Option<ArchiveKey>,
    /// Tombstone rows mark a deletion and never hold bytes.
    #[serde(default)]
    pub deleted: bool,
}

impl VersionEntry {
    /// True when this version's bytes are the ones at `path` in the live tree.
    pub fn is_live(&self) -> bool {
        self.archive_key.is_none() && !self.deleted
    }
}

/// Paths touched by one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub new: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len()
    }
}

/// Directory state at one instant, path -> version.
pub type Snapshot = BTreeMap<String, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffTag {
    Added,
    Updated,
    Unchanged,
    Removed,
}

impl DiffTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffTag::Added => "Added",
            DiffTag::Updated => "Updated",
            DiffTag::Unchanged => "Unchanged",
            DiffTag::Removed => "Removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffItem {
    pub path: String,
    pub tag: DiffTag,
}
