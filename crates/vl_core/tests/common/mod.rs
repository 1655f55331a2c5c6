#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use vl_core::app_error::{AppError, AppResult};
use vl_core::object_store::{BlobStore, ObjectInfo, ObjectMeta};

/// In-memory blob store with rename failure injection.
#[derive(Default)]
pub struct MemBlobStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    failing_renames: AtomicU32,
    failures_retryable: AtomicBool,
    // Renames left to succeed before every later one fails.
    renames_until_outage: Mutex<Option<u32>>,
    rename_calls: AtomicU32,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_at(&self, key: &str, bytes: &[u8], modified_at: &str) {
        self.objects
            .lock()
            .expect("objects lock")
            .insert(key.to_string(), (bytes.to_vec(), modified_at.to_string()));
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("objects lock")
            .get(key)
            .map(|(b, _)| b.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().expect("objects lock").keys().cloned().collect()
    }

    pub fn fail_next_renames(&self, n: u32, retryable: bool) {
        self.failing_renames.store(n, Ordering::SeqCst);
        self.failures_retryable.store(retryable, Ordering::SeqCst);
    }

    /// Lets `successes` renames through, then fails every rename after them.
    pub fn fail_renames_after(&self, successes: u32) {
        *self.renames_until_outage.lock().expect("outage lock") = Some(successes);
    }

    pub fn rename_calls(&self) -> u32 {
        self.rename_calls.load(Ordering::SeqCst)
    }

    fn missing(key: &str) -> AppError {
        AppError::new(
            "VL_OBJECT_NOT_FOUND",
            "object_store",
            "no such object",
            false,
            serde_json::json!({ "key": key }),
        )
    }
}

impl BlobStore for MemBlobStore {
    fn list(&self, prefix: &str) -> AppResult<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .lock()
            .expect("objects lock")
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (b, _))| ObjectInfo {
                key: k.clone(),
                size_bytes: b.len() as u64,
            })
            .collect())
    }

    fn stat(&self, key: &str) -> AppResult<Option<ObjectMeta>> {
        Ok(self
            .objects
            .lock()
            .expect("objects lock")
            .get(key)
            .map(|(b, at)| ObjectMeta {
                size_bytes: b.len() as u64,
                modified_at: at.clone(),
            }))
    }

    fn open(&self, key: &str) -> AppResult<Box<dyn Read + Send>> {
        let bytes = self.bytes(key).ok_or_else(|| Self::missing(key))?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        self.put_at(key, bytes, "2000-01-01T00:00:00Z");
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> AppResult<()> {
        self.rename_calls.fetch_add(1, Ordering::SeqCst);
        let outage = {
            let mut left = self.renames_until_outage.lock().expect("outage lock");
            match left.as_mut() {
                Some(0) => true,
                Some(n) => {
                    *n -= 1;
                    false
                }
                None => false,
            }
        };
        let pending = self.failing_renames.load(Ordering::SeqCst);
        if outage || pending > 0 {
            if !outage {
                self.failing_renames.store(pending - 1, Ordering::SeqCst);
            }
            return Err(AppError::new(
                "VL_STORE_IO_FAILED",
                "object_store",
                "injected rename failure",
                self.failures_retryable.load(Ordering::SeqCst),
                serde_json::json!({ "key": from }),
            ));
        }
        let mut objects = self.objects.lock().expect("objects lock");
        let value = objects.remove(from).ok_or_else(|| Self::missing(from))?;
        objects.insert(to.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        self.objects.lock().expect("objects lock").remove(key);
        Ok(())
    }

    fn presigned_url(&self, key: &str, download_name: &str, ttl: Duration) -> AppResult<String> {
        Ok(format!(
            "mem://{}?download={}&ttl={}",
            key,
            download_name,
            ttl.as_secs()
        ))
    }
}

/// Mimics one sync pass over a live file: the old bytes go to the backup
/// area and the new bytes replace the live object.
pub fn sync_modify(store: &MemBlobStore, key: &str, bytes: &[u8], modified_at: &str) {
    let old = store.bytes(key).expect("live object before modify");
    store.put_at(&format!(".sync-backup/{}", key), &old, "2000-01-01T00:00:00Z");
    store.put_at(key, bytes, modified_at);
}

pub fn sync_delete(store: &MemBlobStore, key: &str) {
    let old = store.bytes(key).expect("live object before delete");
    store.put_at(&format!(".sync-backup/{}", key), &old, "2000-01-01T00:00:00Z");
    store.delete(key).expect("delete live object");
}
