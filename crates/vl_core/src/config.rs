use crate::app_error::{AppError, AppResult};
use crate::archive::{RetryPolicy, DEFAULT_ARCHIVE_PREFIX};
use crate::ingest::{FailurePolicy, IngestOptions, DEFAULT_BACKUP_PREFIX};
use crate::object_store::{BlobStore, FsBlobStore};
use crate::object_store_s3::S3BlobStore;
use crate::timestamp::now_timestamp;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "versionledger.json";
const CONFIG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    Fs {
        root: String,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlConfig {
    pub schema_version: u32,
    pub db_path: String,
    pub store: StoreConfig,
    #[serde(default = "default_source_base")]
    pub source_base: String,
    #[serde(default = "default_backup_prefix")]
    pub backup_prefix: String,
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_source_base() -> String {
    "/".to_string()
}

fn default_backup_prefix() -> String {
    DEFAULT_BACKUP_PREFIX.to_string()
}

fn default_archive_prefix() -> String {
    DEFAULT_ARCHIVE_PREFIX.to_string()
}

fn default_presign_ttl_secs() -> u64 {
    3600
}

fn default_query_timeout_ms() -> u64 {
    5000
}

impl Default for VlConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            db_path: "db/versions.sqlite".to_string(),
            store: StoreConfig::Fs {
                root: "store".to_string(),
            },
            source_base: default_source_base(),
            backup_prefix: default_backup_prefix(),
            archive_prefix: default_archive_prefix(),
            presign_ttl_secs: default_presign_ttl_secs(),
            query_timeout_ms: default_query_timeout_ms(),
            failure_policy: FailurePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

fn config_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "config", message, false, details)
}

/// Resolves `raw` against the config root unless it is already absolute.
fn resolve(root: &Path, raw: &str) -> PathBuf {
    let p = Path::new(raw);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// A configuration together with the directory it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub root: PathBuf,
    pub config: VlConfig,
}

impl LoadedConfig {
    /// `VL_DB_PATH` overrides the configured database location.
    pub fn db_path(&self) -> PathBuf {
        match std::env::var("VL_DB_PATH") {
            Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => resolve(&self.root, &self.config.db_path),
        }
    }

    pub fn build_store(&self) -> Arc<dyn BlobStore> {
        match &self.config.store {
            StoreConfig::Fs { root } => Arc::new(FsBlobStore::new(resolve(&self.root, root))),
            StoreConfig::S3 { bucket, prefix } => {
                Arc::new(S3BlobStore::new(bucket.clone(), prefix.clone()))
            }
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            backup_prefix: self.config.backup_prefix.clone(),
            archive_prefix: self.config.archive_prefix.clone(),
            failure_policy: self.config.failure_policy,
            retry: self.config.retry,
            run_time: now_timestamp(),
            cancel: None,
        }
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.config.presign_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.config.query_timeout_ms)
    }
}

pub fn validate_config(config: &VlConfig) -> AppResult<()> {
    if config.db_path.trim().is_empty() {
        return Err(config_error(
            "VL_CONFIG_INVALID",
            "db_path must not be empty",
            serde_json::json!({}),
        ));
    }
    if config.archive_prefix.trim_matches('/').is_empty() {
        return Err(config_error(
            "VL_CONFIG_INVALID",
            "archive_prefix must not be empty",
            serde_json::json!({}),
        ));
    }
    if config.backup_prefix.trim_matches('/').is_empty()
        || config.backup_prefix.trim_matches('/') == config.archive_prefix.trim_matches('/')
    {
        return Err(config_error(
            "VL_CONFIG_INVALID",
            "backup_prefix must be non-empty and differ from archive_prefix",
            serde_json::json!({
                "backup_prefix": config.backup_prefix,
                "archive_prefix": config.archive_prefix
            }),
        ));
    }
    if let StoreConfig::S3 { bucket, .. } = &config.store {
        if bucket.trim().is_empty() {
            return Err(config_error(
                "VL_CONFIG_INVALID",
                "s3 store requires a bucket",
                serde_json::json!({}),
            ));
        }
    }
    if config.presign_ttl_secs == 0 {
        return Err(config_error(
            "VL_CONFIG_INVALID",
            "presign_ttl_secs must be positive",
            serde_json::json!({}),
        ));
    }
    Ok(())
}

pub fn config_save(root: &Path, config: &VlConfig) -> AppResult<()> {
    fs::create_dir_all(root).map_err(|e| {
        config_error(
            "VL_CONFIG_INIT_FAILED",
            "failed to create config directory",
            serde_json::json!({ "error": e.to_string(), "path": root }),
        )
    })?;
    let bytes = serde_json::to_vec_pretty(config).map_err(|e| {
        config_error(
            "VL_CONFIG_INIT_FAILED",
            "failed to serialize config",
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;
    fs::write(root.join(CONFIG_FILE_NAME), bytes).map_err(|e| {
        config_error(
            "VL_CONFIG_INIT_FAILED",
            "failed to write config",
            serde_json::json!({ "error": e.to_string(), "path": root.join(CONFIG_FILE_NAME) }),
        )
    })
}

/// Writes a default config under `root` and creates the ledger database.
pub fn config_init(root: &Path, store: Option<StoreConfig>) -> AppResult<LoadedConfig> {
    let mut config = VlConfig::default();
    if let Some(store) = store {
        config.store = store;
    }
    validate_config(&config)?;
    config_save(root, &config)?;

    let loaded = LoadedConfig {
        root: root.to_path_buf(),
        config,
    };
    if let StoreConfig::Fs { root: store_root } = &loaded.config.store {
        let dir = resolve(root, store_root);
        fs::create_dir_all(&dir).map_err(|e| {
            config_error(
                "VL_CONFIG_INIT_FAILED",
                "failed to create store directory",
                serde_json::json!({ "error": e.to_string(), "path": dir }),
            )
        })?;
    }
    crate::db::open_db(&loaded.db_path())?;
    Ok(loaded)
}

pub fn config_open(root: &Path) -> AppResult<LoadedConfig> {
    let path = root.join(CONFIG_FILE_NAME);
    let bytes = fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            config_error(
                "VL_CONFIG_MISSING",
                "config file is missing",
                serde_json::json!({ "path": path }),
            )
        } else {
            config_error(
                "VL_CONFIG_INVALID",
                "failed to read config file",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        }
    })?;

    let config: VlConfig = serde_json::from_slice(&bytes).map_err(|e| {
        config_error(
            "VL_CONFIG_INVALID",
            "failed to parse config file",
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })?;
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(config_error(
            "VL_CONFIG_UNSUPPORTED_VERSION",
            "unsupported config schema_version",
            serde_json::json!({ "expected": CONFIG_SCHEMA_VERSION, "actual": config.schema_version }),
        ));
    }
    validate_config(&config)?;

    Ok(LoadedConfig {
        root: root.to_path_buf(),
        config,
    })
}
