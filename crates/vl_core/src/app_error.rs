use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub schema_version: u32,
    pub code: String,
    pub category: String,
    pub message: String,
    pub retryable: bool,
    pub details: Value,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(code: &str, category: &str, message: &str, retryable: bool, details: Value) -> Self {
        Self {
            schema_version: 1,
            code: code.to_string(),
            category: category.to_string(),
            message: message.to_string(),
            retryable,
            details,
        }
    }

    pub fn internal(message: &str) -> Self {
        Self::new("VL_INTERNAL_ERROR", "internal", message, false, json!({}))
    }

    /// Query found nothing; distinct from a failed query.
    pub fn is_empty_result(&self) -> bool {
        self.code == "VL_NO_RESULTS_AT_TIME" || self.code == "VL_NO_RESULTS"
    }

    pub fn is_ledger_integrity(&self) -> bool {
        matches!(
            self.code.as_str(),
            "VL_LEDGER_DUPLICATE_VERSION"
                | "VL_LEDGER_ALREADY_ARCHIVED"
                | "VL_LEDGER_NOT_FOUND"
                | "VL_LEDGER_VERSION_GAP"
                | "VL_LEDGER_TOMBSTONE"
                | "VL_LEDGER_DUPLICATE_ARCHIVE_KEY"
        )
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Maps a sqlite failure to a retryable `VL_QUERY_FAILED`. A query cut off by
/// the reader deadline carries `timed_out: true`.
pub(crate) fn query_failed(message: &str, err: rusqlite::Error, details: Value) -> AppError {
    let timed_out = err.sqlite_error_code() == Some(rusqlite::ErrorCode::OperationInterrupted);
    let mut details = details;
    if let Value::Object(map) = &mut details {
        map.insert("error".to_string(), Value::String(err.to_string()));
        if timed_out {
            map.insert("timed_out".to_string(), Value::Bool(true));
        }
    }
    let message = if timed_out {
        format!("{message}: query exceeded its time limit")
    } else {
        message.to_string()
    };
    AppError::new("VL_QUERY_FAILED", "query", &message, true, details)
}
