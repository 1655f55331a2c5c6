use crate::app_error::{AppError, AppResult};
use crate::paths::join_base;
use crate::types::ChangeSet;
use std::collections::HashSet;

const NEW_FILE_CODE: &str = ">f+++++++";
const DELETE_CODE: &str = "*deleting";
// Older sync tools print 9-character codes, newer ones 11.
const ITEMIZE_CODE_LEN: std::ops::RangeInclusive<usize> = 9..=11;

/// Trailer and header lines the sync tool prints around the itemized list.
fn is_sentinel_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || trimmed == "sending incremental file list"
        || trimmed == "receiving incremental file list"
        || trimmed == "receiving file list ... done"
        || trimmed == "receiving file list"
        || trimmed.starts_with("created directory ")
        || trimmed.starts_with("total size is ")
        || (trimmed.starts_with("sent ") && trimmed.contains(" bytes") && trimmed.contains("received "))
}

fn malformed(line_no: usize, line: &str, reason: &str) -> AppError {
    AppError::new(
        "VL_CHANGE_REPORT_MALFORMED",
        "change_report",
        "change report line could not be classified",
        false,
        serde_json::json!({ "line": line_no, "text": line, "reason": reason }),
    )
}

fn is_itemize_code(code: &str) -> bool {
    ITEMIZE_CODE_LEN.contains(&code.len())
        && code.is_ascii()
        && matches!(code.as_bytes()[0], b'<' | b'>' | b'c' | b'h' | b'.')
}

/// Paths in first-seen order, without duplicates.
#[derive(Default)]
struct UniquePaths {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl UniquePaths {
    fn push(&mut self, path: String) {
        if self.seen.insert(path.clone()) {
            self.order.push(path);
        }
    }
}

#[derive(Default)]
struct Buckets {
    new: UniquePaths,
    modified: UniquePaths,
    deleted: UniquePaths,
}

impl Buckets {
    fn finish(self) -> ChangeSet {
        ChangeSet {
            new: self.new.order,
            modified: self.modified.order,
            deleted: self.deleted.order,
        }
    }
}

/// Decodes raw report bytes. File names that are not valid UTF-8 cannot be
/// stored as ledger paths, so they fail the report with their line number.
pub fn decode_report(bytes: &[u8]) -> AppResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| {
        let valid = &bytes[..e.valid_up_to()];
        let line_no = valid.iter().filter(|b| **b == b'\n').count() + 1;
        AppError::new(
            "VL_CHANGE_REPORT_MALFORMED",
            "change_report",
            "change report is not valid utf-8",
            false,
            serde_json::json!({ "line": line_no, "byte_offset": e.valid_up_to() }),
        )
    })
}

/// Classifies an itemized change report into new, modified and deleted paths,
/// each prefixed with `base`. Any line that is neither a sentinel nor a
/// well-formed change line fails the whole report.
pub fn parse_changes(report: &str, base: &str) -> AppResult<ChangeSet> {
    let mut out = Buckets::default();

    for (idx, raw) in report.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if is_sentinel_line(line) {
            continue;
        }

        let Some((code, rest)) = line.split_once(' ') else {
            return Err(malformed(line_no, line, "missing separator"));
        };

        if code == DELETE_CODE {
            // The sync tool pads the deleting marker to the itemize width.
            let file = rest.trim_start();
            if file.is_empty() {
                return Err(malformed(line_no, line, "empty path"));
            }
            if !file.ends_with('/') {
                out.deleted.push(join_base(base, file));
            }
            continue;
        }

        if !is_itemize_code(code) {
            return Err(malformed(line_no, line, "unrecognized change code"));
        }
        if rest.is_empty() {
            return Err(malformed(line_no, line, "empty path"));
        }

        if code.starts_with(NEW_FILE_CODE) {
            out.new.push(join_base(base, rest));
        } else if code.starts_with(">f") {
            out.modified.push(join_base(base, rest));
        }
    }

    Ok(out.finish())
}

/// Parses a structured change list and normalizes its paths.
pub fn parse_change_list_json(bytes: &[u8]) -> AppResult<ChangeSet> {
    let raw: ChangeSet = serde_json::from_slice(bytes).map_err(|e| {
        AppError::new(
            "VL_CHANGE_REPORT_MALFORMED",
            "change_report",
            "structured change list is not valid json",
            false,
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;

    let mut out = Buckets::default();
    for (from, into) in [
        (raw.new, &mut out.new),
        (raw.modified, &mut out.modified),
        (raw.deleted, &mut out.deleted),
    ] {
        for path in from {
            if path.trim().is_empty() {
                return Err(AppError::new(
                    "VL_CHANGE_REPORT_MALFORMED",
                    "change_report",
                    "structured change list contains an empty path",
                    false,
                    serde_json::json!({}),
                ));
            }
            into.push(crate::paths::normalize_path(&path));
        }
    }
    Ok(out.finish())
}
