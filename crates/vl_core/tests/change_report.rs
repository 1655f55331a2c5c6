use vl_core::change_report::{decode_report, parse_change_list_json, parse_changes};

#[test]
fn new_file_line_is_prefixed_with_base() {
    let out = parse_changes(">f+++++++ new/file.txt\n", "/src").expect("parse");
    assert_eq!(out.new, vec!["/src/new/file.txt".to_string()]);
    assert!(out.modified.is_empty());
    assert!(out.deleted.is_empty());
}

#[test]
fn deleted_directories_are_not_tracked() {
    let out = parse_changes("*deleting docs/\n*deleting   docs/old.txt\n", "/src").expect("parse");
    assert_eq!(out.deleted, vec!["/src/docs/old.txt".to_string()]);
}

#[test]
fn full_sync_output_strips_header_and_trailer() {
    let report = "receiving incremental file list\n\
                  >f+++++++++ a.txt\n\
                  >f.st...... b.txt\n\
                  cd+++++++++ sub/\n\
                  .d..t...... ./\n\
                  .f...p..... perms-only.txt\n\
                  *deleting   gone.txt\n\
                  \n\
                  sent 1,234 bytes  received 5,678 bytes  13,824.00 bytes/sec\n\
                  total size is 98,765  speedup is 14.29 (DRY RUN)\n";

    let out = parse_changes(report, "/src/").expect("parse");
    assert_eq!(out.new, vec!["/src/a.txt".to_string()]);
    assert_eq!(out.modified, vec!["/src/b.txt".to_string()]);
    assert_eq!(out.deleted, vec!["/src/gone.txt".to_string()]);
}

#[test]
fn paths_with_spaces_keep_the_whole_remainder() {
    let out = parse_changes(">f.st...... release notes/v 1.txt\n", "/pub").expect("parse");
    assert_eq!(out.modified, vec!["/pub/release notes/v 1.txt".to_string()]);
}

#[test]
fn line_without_separator_fails_the_report() {
    let err = parse_changes(">f+++++++++ ok.txt\ngarbage\n", "/src").expect_err("malformed");
    assert_eq!(err.code, "VL_CHANGE_REPORT_MALFORMED");
    assert_eq!(err.details["line"], 2);
}

#[test]
fn unknown_change_code_fails_the_report() {
    let err = parse_changes("xyz file.txt\n", "/src").expect_err("malformed");
    assert_eq!(err.code, "VL_CHANGE_REPORT_MALFORMED");
    assert_eq!(err.details["reason"], "unrecognized change code");
}

#[test]
fn repeated_paths_are_reported_once() {
    let out = parse_changes(">f.st...... a.txt\n>f..t...... a.txt\n", "/src").expect("parse");
    assert_eq!(out.modified, vec!["/src/a.txt".to_string()]);
}

#[test]
fn structured_change_list_is_normalized() {
    let json = br#"{ "new": ["/src//a.txt"], "modified": ["/src/b.txt/"], "deleted": [] }"#;
    let out = parse_change_list_json(json).expect("parse json");
    assert_eq!(out.new, vec!["/src/a.txt".to_string()]);
    assert_eq!(out.modified, vec!["/src/b.txt".to_string()]);
    assert!(out.deleted.is_empty());

    let err = parse_change_list_json(b"{ not json").expect_err("invalid json");
    assert_eq!(err.code, "VL_CHANGE_REPORT_MALFORMED");
}

#[test]
fn large_reports_keep_first_seen_order_without_duplicates() {
    let mut report = String::from("receiving incremental file list\n");
    for n in 0..60_000 {
        report.push_str(&format!(">f+++++++ d/file{}.txt\n", n));
        if n % 3 == 0 {
            report.push_str(&format!(">f+++++++ d/file{}.txt\n", n / 2));
        }
    }

    let out = parse_changes(&report, "/mirror").expect("parse");
    assert_eq!(out.new.len(), 60_000);
    assert_eq!(out.new[0], "/mirror/d/file0.txt");
    assert_eq!(out.new[1], "/mirror/d/file1.txt");
    assert_eq!(out.new[59_999], "/mirror/d/file59999.txt");
}

#[test]
fn non_utf8_file_names_fail_the_report() {
    let mut bytes = b"receiving incremental file list\n>f+++++++ ok.txt\n>f+++++++ caf".to_vec();
    bytes.extend_from_slice(&[0xE9, b'.', b't', b'x', b't', b'\n']);

    let err = decode_report(&bytes).expect_err("latin-1 name");
    assert_eq!(err.code, "VL_CHANGE_REPORT_MALFORMED");
    assert_eq!(err.details["line"], serde_json::json!(3));

    let text = decode_report(">f+++++++ café.txt\n".as_bytes()).expect("utf-8 name");
    let out = parse_changes(text, "/m").expect("parse");
    assert_eq!(out.new, vec!["/m/café.txt".to_string()]);
}
