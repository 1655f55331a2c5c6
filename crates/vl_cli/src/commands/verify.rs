use vl_core::app_error::{AppError, AppResult};
use vl_core::archive::verify_archive;
use vl_core::config::config_open;
use vl_core::db::open_db_readonly;
use vl_core::ledger::history;
use vl_core::paths::normalize_path;
use std::path::Path;

pub fn run_verify_archive(root: &str, path: &str) -> AppResult<()> {
    let loaded = config_open(Path::new(root))?;
    let conn = open_db_readonly(&loaded.db_path(), loaded.query_timeout())?;
    let store = loaded.build_store();

    let mut mismatched = Vec::new();
    let mut checked = 0usize;
    for entry in history(&conn, &normalize_path(path))? {
        if entry.archive_key.is_none() {
            continue;
        }
        checked += 1;
        if !verify_archive(store.as_ref(), &loaded.config.archive_prefix, &entry)? {
            mismatched.push(entry.version);
        }
    }

    println!(
        "{}",
        serde_json::json!({ "path": path, "checked": checked, "mismatched": mismatched })
    );
    if mismatched.is_empty() {
        Ok(())
    } else {
        Err(AppError::new(
            "VL_ARCHIVE_VERIFY_FAILED",
            "archive",
            "archived content does not match its archive key",
            false,
            serde_json::json!({ "path": path, "versions": mismatched }),
        ))
    }
}
