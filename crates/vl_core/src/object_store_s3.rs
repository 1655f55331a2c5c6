use crate::app_error::{AppError, AppResult};
use crate::object_store::{BlobStore, FsBlobStore, ObjectInfo, ObjectMeta};
use crate::timestamp::TIMESTAMP_FORMAT;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Runtime and client shared by every call on one store.
#[derive(Debug)]
struct Remote {
    rt: tokio::runtime::Runtime,
    client: aws_sdk_s3::Client,
}

#[derive(Debug, PartialEq, Eq)]
enum RemoteFailure {
    NotFound,
    Auth,
    Network,
}

impl RemoteFailure {
    fn classify(message: &str) -> Self {
        if message.contains("NoSuchKey") || message.contains("NotFound") || message.contains("status: 404") {
            return Self::NotFound;
        }
        let lower = message.to_ascii_lowercase();
        let auth_markers = ["credential", "accessdenied", "signature", "unauthorized", "forbidden", "403"];
        if auth_markers.iter().any(|m| lower.contains(m)) {
            Self::Auth
        } else {
            Self::Network
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3BlobStore {
    pub bucket: String,
    pub prefix: String,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub emulate_root: Option<PathBuf>,
    remote: Arc<OnceLock<Arc<Remote>>>,
}

impl S3BlobStore {
    /// Reads `VL_S3_ENDPOINT`, `VL_S3_REGION` and `VL_S3_EMULATE_ROOT` from the
    /// environment.
    pub fn new(bucket: String, prefix: String) -> Self {
        Self {
            bucket,
            prefix,
            endpoint_url: std::env::var("VL_S3_ENDPOINT").ok(),
            region: std::env::var("VL_S3_REGION").ok(),
            emulate_root: std::env::var("VL_S3_EMULATE_ROOT").ok().map(PathBuf::from),
            remote: Arc::default(),
        }
    }

    pub fn with_emulate_root(mut self, root: PathBuf) -> Self {
        self.emulate_root = Some(root);
        self
    }

    pub fn key_for(&self, leaf: &str) -> String {
        let leaf = leaf.trim_start_matches('/');
        match self.prefix.trim_matches('/') {
            "" => leaf.to_string(),
            prefix => format!("{}/{}", prefix, leaf),
        }
    }

    fn leaf_for(&self, key: &str) -> String {
        match self.prefix.trim_matches('/') {
            "" => key.to_string(),
            prefix => key
                .strip_prefix(prefix)
                .map(|rest| rest.trim_start_matches('/').to_string())
                .unwrap_or_else(|| key.to_string()),
        }
    }

    /// Filesystem stand-in rooted at `emulate_root/bucket/prefix`.
    fn emulated(&self) -> Option<FsBlobStore> {
        self.emulate_root.as_ref().map(|root| {
            let mut p = root.join(&self.bucket);
            if !self.prefix.trim_matches('/').is_empty() {
                p = p.join(self.prefix.trim_matches('/'));
            }
            FsBlobStore::new(p)
        })
    }

    fn remote_error(&self, failure: RemoteFailure, message: String, operation: &str, key: &str) -> AppError {
        let details = serde_json::json!({ "error": message, "bucket": self.bucket, "key": key });
        match failure {
            RemoteFailure::NotFound => AppError::new(
                "VL_OBJECT_NOT_FOUND",
                "object_store",
                "s3 object does not exist",
                false,
                details,
            ),
            RemoteFailure::Auth => AppError::new(
                "VL_STORE_AUTH_FAILED",
                "object_store",
                &format!("failed {operation} s3 object"),
                false,
                details,
            ),
            RemoteFailure::Network => AppError::new(
                "VL_STORE_NETWORK_FAILED",
                "object_store",
                &format!("failed {operation} s3 object"),
                true,
                details,
            ),
        }
    }

    fn sdk_error<E: std::error::Error>(&self, err: &E, operation: &str, key: &str) -> AppError {
        let message = DisplayErrorContext(err).to_string();
        self.remote_error(RemoteFailure::classify(&message), message, operation, key)
    }

    fn modified_at(&self, last_modified: Option<&DateTime>, key: &str) -> AppResult<String> {
        last_modified
            .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), 0))
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .ok_or_else(|| {
                AppError::new(
                    "VL_STORE_IO_FAILED",
                    "object_store",
                    "s3 object has no usable last-modified time",
                    false,
                    serde_json::json!({ "bucket": self.bucket, "key": key }),
                )
            })
    }

    /// Builds the runtime and loads the AWS config once, on first remote call.
    fn remote(&self) -> AppResult<Arc<Remote>> {
        if let Some(remote) = self.remote.get() {
            return Ok(remote.clone());
        }

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                AppError::new(
                    "VL_STORE_NETWORK_FAILED",
                    "object_store",
                    "failed creating async runtime for s3 access",
                    true,
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = self.region.clone() {
            loader = loader.region(aws_sdk_s3::config::Region::new(region));
        }
        if let Some(endpoint) = self.endpoint_url.clone() {
            loader = loader.endpoint_url(endpoint);
        }
        let cfg = rt.block_on(loader.load());
        let client = aws_sdk_s3::Client::new(&cfg);
        tracing::debug!(bucket = %self.bucket, "s3 client ready");

        // A racing caller may have won; either client is equivalent.
        Ok(self.remote.get_or_init(|| Arc::new(Remote { rt, client })).clone())
    }
}

/// Pulls the response body one chunk at a time so large objects are never
/// held in memory whole.
struct S3BodyReader {
    remote: Arc<Remote>,
    body: ByteStream,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for S3BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.chunk.len() {
            match self.remote.rt.block_on(self.body.next()) {
                Some(Ok(bytes)) => {
                    self.chunk = bytes.to_vec();
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(std::io::Error::other(e)),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl BlobStore for S3BlobStore {
    fn list(&self, prefix: &str) -> AppResult<Vec<ObjectInfo>> {
        if let Some(fs) = self.emulated() {
            return fs.list(prefix);
        }

        let remote = self.remote()?;
        let remote_prefix = self.key_for(prefix);
        remote.rt.block_on(async {
            let mut out = Vec::new();
            let mut token: Option<String> = None;
            loop {
                let page = remote
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&remote_prefix)
                    .set_continuation_token(token.take())
                    .send()
                    .await
                    .map_err(|e| self.sdk_error(&e, "listing", &remote_prefix))?;
                out.extend(page.contents().iter().filter_map(|obj| {
                    obj.key().map(|key| ObjectInfo {
                        key: self.leaf_for(key),
                        size_bytes: obj.size().unwrap_or(0).max(0) as u64,
                    })
                }));
                match page.next_continuation_token() {
                    Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                    _ => break,
                }
            }
            out.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(out)
        })
    }

    fn stat(&self, leaf: &str) -> AppResult<Option<ObjectMeta>> {
        if let Some(fs) = self.emulated() {
            return fs.stat(leaf);
        }

        let remote = self.remote()?;
        let key = self.key_for(leaf);
        let head = remote
            .rt
            .block_on(remote.client.head_object().bucket(&self.bucket).key(&key).send());
        let out = match head {
            Ok(out) => out,
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                return match RemoteFailure::classify(&message) {
                    RemoteFailure::NotFound => Ok(None),
                    failure => Err(self.remote_error(failure, message, "inspecting", &key)),
                };
            }
        };

        Ok(Some(ObjectMeta {
            size_bytes: out.content_length().unwrap_or(0).max(0) as u64,
            modified_at: self.modified_at(out.last_modified(), &key)?,
        }))
    }

    fn open(&self, leaf: &str) -> AppResult<Box<dyn Read + Send>> {
        if let Some(fs) = self.emulated() {
            return fs.open(leaf);
        }

        let remote = self.remote()?;
        let key = self.key_for(leaf);
        let out = remote
            .rt
            .block_on(remote.client.get_object().bucket(&self.bucket).key(&key).send())
            .map_err(|e| self.sdk_error(&e, "reading", &key))?;
        Ok(Box::new(S3BodyReader {
            remote: remote.clone(),
            body: out.body,
            chunk: Vec::new(),
            pos: 0,
        }))
    }

    fn put(&self, leaf: &str, bytes: &[u8]) -> AppResult<()> {
        if let Some(fs) = self.emulated() {
            return fs.put(leaf, bytes);
        }

        let remote = self.remote()?;
        let key = self.key_for(leaf);
        remote
            .rt
            .block_on(
                remote
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .body(ByteStream::from(bytes.to_vec()))
                    .send(),
            )
            .map_err(|e| self.sdk_error(&e, "writing", &key))?;
        Ok(())
    }

    /// S3 has no rename; copy then delete the source.
    fn rename(&self, from: &str, to: &str) -> AppResult<()> {
        if let Some(fs) = self.emulated() {
            return fs.rename(from, to);
        }

        let remote = self.remote()?;
        let src = self.key_for(from);
        let dest = self.key_for(to);
        remote.rt.block_on(async {
            remote
                .client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(format!("{}/{}", self.bucket, src))
                .key(&dest)
                .send()
                .await
                .map_err(|e| self.sdk_error(&e, "copying", &src))?;
            remote
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&src)
                .send()
                .await
                .map_err(|e| self.sdk_error(&e, "deleting", &src))?;
            Ok(())
        })
    }

    fn delete(&self, leaf: &str) -> AppResult<()> {
        if let Some(fs) = self.emulated() {
            return fs.delete(leaf);
        }

        let remote = self.remote()?;
        let key = self.key_for(leaf);
        remote
            .rt
            .block_on(remote.client.delete_object().bucket(&self.bucket).key(&key).send())
            .map_err(|e| self.sdk_error(&e, "deleting", &key))?;
        Ok(())
    }

    fn presigned_url(&self, leaf: &str, download_name: &str, ttl: Duration) -> AppResult<String> {
        if let Some(fs) = self.emulated() {
            return fs.presigned_url(leaf, download_name, ttl);
        }

        let presign = PresigningConfig::expires_in(ttl).map_err(|e| {
            AppError::new(
                "VL_CONFIG_INVALID",
                "object_store",
                "invalid presigned url lifetime",
                false,
                serde_json::json!({ "error": e.to_string(), "ttl_secs": ttl.as_secs() }),
            )
        })?;
        let remote = self.remote()?;
        let key = self.key_for(leaf);
        let req = remote
            .rt
            .block_on(
                remote
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .response_content_disposition(format!("attachment; filename={}", download_name))
                    .presigned(presign),
            )
            .map_err(|e| self.sdk_error(&e, "presigning", &key))?;
        Ok(req.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_are_classified_by_message() {
        assert_eq!(RemoteFailure::classify("service error: NoSuchKey"), RemoteFailure::NotFound);
        assert_eq!(RemoteFailure::classify("status: 404"), RemoteFailure::NotFound);
        assert_eq!(RemoteFailure::classify("AccessDenied: nope"), RemoteFailure::Auth);
        assert_eq!(RemoteFailure::classify("connection reset"), RemoteFailure::Network);
    }

    #[test]
    fn missing_last_modified_is_an_error() {
        let store = S3BlobStore::new("bucket".to_string(), String::new());
        let at = DateTime::from_secs(1_580_515_200);
        assert_eq!(store.modified_at(Some(&at), "k").expect("time"), "2020-02-01T00:00:00Z");

        let err = store.modified_at(None, "k").expect_err("missing");
        assert_eq!(err.code, "VL_STORE_IO_FAILED");
        assert!(!err.retryable);
    }

    #[test]
    fn body_reader_fills_small_buffers_until_the_stream_ends() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let cfg = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();
        let remote = Arc::new(Remote {
            rt,
            client: aws_sdk_s3::Client::from_conf(cfg),
        });

        let payload: Vec<u8> = (0..1000u32).map(|n| (n % 251) as u8).collect();
        let mut reader = S3BodyReader {
            remote,
            body: ByteStream::from(payload.clone()),
            chunk: Vec::new(),
            pos: 0,
        };

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = reader.read(&mut buf).expect("read");
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, payload);
    }
}
