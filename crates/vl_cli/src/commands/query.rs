use vl_core::app_error::AppResult;
use vl_core::config::config_open;
use vl_core::diff::DiffMode;
use vl_core::service::{UrlMode, VersionService};
use serde::Serialize;
use std::path::Path;

fn service(root: &str) -> AppResult<VersionService> {
    let loaded = config_open(Path::new(root))?;
    Ok(VersionService::from_config(&loaded))
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn run_latest(root: &str, path: &str) -> AppResult<()> {
    print_json(&service(root)?.get_latest(path)?);
    Ok(())
}

pub fn run_version(root: &str, path: &str, version: i64) -> AppResult<()> {
    print_json(&service(root)?.get_version(path, version)?);
    Ok(())
}

pub fn run_at_time(root: &str, path: &str, time: &str) -> AppResult<()> {
    print_json(&service(root)?.get_at_time(path, time)?);
    Ok(())
}

pub fn run_history(root: &str, path: &str) -> AppResult<()> {
    print_json(&service(root)?.get_history(path)?);
    Ok(())
}

pub fn run_ls(root: &str, dir: &str, at: Option<&str>, urls: UrlMode) -> AppResult<()> {
    let svc = service(root)?;
    let entries = match at {
        Some(time) => svc.get_past(dir, time, urls)?,
        None => svc.get_listing(dir, urls)?,
    };
    print_json(&entries);
    Ok(())
}

pub fn run_compare(root: &str, dir: &str, start: &str, end: &str, mode: DiffMode) -> AppResult<()> {
    print_json(&service(root)?.compare(dir, start, end, mode)?);
    Ok(())
}
