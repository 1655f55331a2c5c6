use crate::app_error::{AppError, AppResult};
use crate::timestamp::format_system_time;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub size_bytes: u64,
    pub modified_at: String,
}

/// Keyed blob store holding both the live tree and the archive area.
/// Keys are slash-separated without a leading slash.
pub trait BlobStore: Send + Sync {
    fn list(&self, prefix: &str) -> AppResult<Vec<ObjectInfo>>;
    fn stat(&self, key: &str) -> AppResult<Option<ObjectMeta>>;
    fn open(&self, key: &str) -> AppResult<Box<dyn Read + Send>>;
    fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()>;
    fn rename(&self, from: &str, to: &str) -> AppResult<()>;
    fn delete(&self, key: &str) -> AppResult<()>;
    fn presigned_url(&self, key: &str, download_name: &str, ttl: Duration) -> AppResult<String>;

    fn get(&self, key: &str) -> AppResult<Vec<u8>> {
        let mut reader = self.open(key)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).map_err(|e| {
            store_io_error("failed reading object bytes", &e, key)
        })?;
        Ok(out)
    }

    fn exists(&self, key: &str) -> AppResult<bool> {
        Ok(self.stat(key)?.is_some())
    }
}

pub(crate) fn store_io_error(message: &str, err: &std::io::Error, key: &str) -> AppError {
    let not_found = err.kind() == std::io::ErrorKind::NotFound;
    AppError::new(
        if not_found { "VL_OBJECT_NOT_FOUND" } else { "VL_STORE_IO_FAILED" },
        "object_store",
        message,
        !not_found,
        serde_json::json!({ "error": err.to_string(), "key": key }),
    )
}

/// Blob store backed by a local directory tree.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    pub root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for_key(&self, key: &str) -> AppResult<PathBuf> {
        let trimmed = key.trim_start_matches('/');
        if trimmed.split('/').any(|part| part == "..") {
            return Err(AppError::new(
                "VL_STORE_KEY_INVALID",
                "object_store",
                "object key must not escape the store root",
                false,
                serde_json::json!({ "key": key }),
            ));
        }
        Ok(self.root.join(trimmed))
    }

    fn key_for_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

impl BlobStore for FsBlobStore {
    fn list(&self, prefix: &str) -> AppResult<Vec<ObjectInfo>> {
        let prefix = prefix.trim_start_matches('/');
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).into_iter() {
            let entry = entry.map_err(|e| {
                AppError::new(
                    "VL_STORE_IO_FAILED",
                    "object_store",
                    "failed walking store directory",
                    true,
                    serde_json::json!({ "error": e.to_string(), "root": self.root }),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = self.key_for_path(entry.path()) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push(ObjectInfo { key, size_bytes });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    fn stat(&self, key: &str) -> AppResult<Option<ObjectMeta>> {
        let path = self.path_for_key(key)?;
        let meta = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_io_error("failed reading object metadata", &e, key)),
        };
        let modified = meta
            .modified()
            .map_err(|e| store_io_error("failed reading object modification time", &e, key))?;
        Ok(Some(ObjectMeta {
            size_bytes: meta.len(),
            modified_at: format_system_time(modified),
        }))
    }

    fn open(&self, key: &str) -> AppResult<Box<dyn Read + Send>> {
        let path = self.path_for_key(key)?;
        let file = fs::File::open(&path)
            .map_err(|e| store_io_error("failed opening object", &e, key))?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.path_for_key(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| store_io_error("failed creating object parent directory", &e, key))?;
        }
        fs::write(&path, bytes).map_err(|e| store_io_error("failed writing object", &e, key))
    }

    fn rename(&self, from: &str, to: &str) -> AppResult<()> {
        let src = self.path_for_key(from)?;
        let dest = self.path_for_key(to)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| store_io_error("failed creating rename target directory", &e, to))?;
        }
        fs::rename(&src, &dest).map_err(|e| store_io_error("failed relocating object", &e, from))
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.path_for_key(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_io_error("failed deleting object", &e, key)),
        }
    }

    /// Local files cannot be presigned, so this hands back a `file://` URL that
    /// carries the download name as a query parameter.
    fn presigned_url(&self, key: &str, download_name: &str, _ttl: Duration) -> AppResult<String> {
        let path = self.path_for_key(key)?;
        Ok(format!(
            "file://{}?download={}",
            path.display(),
            download_name
        ))
    }
}
