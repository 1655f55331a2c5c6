use crate::app_error::{AppError, AppResult};
use crate::types::ArchiveKey;
use std::io::Read;

pub fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn archive_header(path: &str, version: i64) -> String {
    format!("{} -- Version {} -- ", path, version)
}

/// Streams `reader` through blake3 behind the version header of `path`.
pub fn archive_key_from_reader(
    path: &str,
    version: i64,
    reader: &mut dyn Read,
) -> std::io::Result<ArchiveKey> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(archive_header(path, version).as_bytes());
    std::io::copy(reader, &mut hasher)?;
    Ok(ArchiveKey(hasher.finalize().to_hex().to_string()))
}

pub fn archive_key_for_bytes(path: &str, version: i64, bytes: &[u8]) -> ArchiveKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(archive_header(path, version).as_bytes());
    hasher.update(bytes);
    ArchiveKey(hasher.finalize().to_hex().to_string())
}

pub fn validate_archive_key(s: &str) -> AppResult<()> {
    if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        return Err(AppError::new(
            "VL_ARCHIVE_KEY_INVALID",
            "archive",
            "archive key must be 64 lowercase hex characters",
            false,
            serde_json::json!({ "value": s }),
        ));
    }
    Ok(())
}
