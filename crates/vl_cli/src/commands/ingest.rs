use vl_core::app_error::{AppError, AppResult};
use vl_core::change_report::{decode_report, parse_change_list_json};
use vl_core::config::config_open;
use vl_core::ingest::{FailurePolicy, IngestOptions, IngestReport};
use vl_core::service::VersionService;
use std::fs;
use std::path::Path;

fn read_input(path: &str) -> AppResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        AppError::new(
            "VL_CHANGE_REPORT_MALFORMED",
            "change_report",
            "failed reading change input",
            false,
            serde_json::json!({ "error": e.to_string(), "path": path }),
        )
    })
}

fn print_report(report: &IngestReport) -> AppResult<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    );
    if report.is_clean() {
        return Ok(());
    }
    Err(AppError::new(
        if report.cancelled { "VL_INGEST_CANCELLED" } else { "VL_INGEST_INCOMPLETE" },
        "ingest",
        "ingestion run did not process every file",
        false,
        serde_json::json!({ "failures": report.failures.len(), "remaining": report.remaining.len() }),
    ))
}

fn options(opts: IngestOptions, best_effort: bool) -> IngestOptions {
    if best_effort {
        IngestOptions {
            failure_policy: FailurePolicy::BestEffort,
            ..opts
        }
    } else {
        opts
    }
}

pub fn run_ingest_report(root: &str, report_path: &str, base: Option<&str>, best_effort: bool) -> AppResult<()> {
    let loaded = config_open(Path::new(root))?;
    let bytes = read_input(report_path)?;
    let text = decode_report(&bytes)?;
    let base = base.unwrap_or(&loaded.config.source_base);
    tracing::info!(report = report_path, base, "ingesting change report");

    let service = VersionService::from_config(&loaded);
    let report = service.ingest_report(text, base, &options(loaded.ingest_options(), best_effort))?;
    print_report(&report)
}

pub fn run_ingest_json(root: &str, changes_path: &str, best_effort: bool) -> AppResult<()> {
    let loaded = config_open(Path::new(root))?;
    let changes = parse_change_list_json(&read_input(changes_path)?)?;
    tracing::info!(changes = changes_path, files = changes.len(), "ingesting change list");

    let service = VersionService::from_config(&loaded);
    let report = service.ingest_changes(&changes, &options(loaded.ingest_options(), best_effort))?;
    print_report(&report)
}
