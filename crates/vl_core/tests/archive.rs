mod common;

use common::MemBlobStore;
use vl_core::archive::{
    archive_object_key, archive_superseded, compute_archive_key, verify_archive, RetryPolicy,
};
use vl_core::db::open_db_in_memory;
use vl_core::hashing::{archive_header, archive_key_for_bytes, archive_key_from_reader, validate_archive_key};
use vl_core::ledger::{begin_write, latest, record_version};
use vl_core::object_store::BlobStore;

#[test]
fn archive_key_depends_on_path_version_and_bytes() {
    assert_eq!(archive_header("/a/f.txt", 2), "/a/f.txt -- Version 2 -- ");

    let base = archive_key_for_bytes("/a/f.txt", 1, b"hello");
    validate_archive_key(&base.0).expect("key shape");
    assert_eq!(base, archive_key_for_bytes("/a/f.txt", 1, b"hello"));
    assert_ne!(base, archive_key_for_bytes("/a/f.txt", 2, b"hello"));
    assert_ne!(base, archive_key_for_bytes("/a/g.txt", 1, b"hello"));
    assert_ne!(base, archive_key_for_bytes("/a/f.txt", 1, b"hello!"));

    let mut reader = std::io::Cursor::new(b"hello".to_vec());
    let streamed = archive_key_from_reader("/a/f.txt", 1, &mut reader).expect("stream hash");
    assert_eq!(streamed, base);
}

#[test]
fn malformed_archive_keys_are_rejected() {
    let candidates = vec![String::new(), "abc".to_string(), "A".repeat(64), "g".repeat(64)];
    for bad in &candidates {
        let err = validate_archive_key(bad).expect_err("invalid key");
        assert_eq!(err.code, "VL_ARCHIVE_KEY_INVALID");
    }
}

#[test]
fn superseded_bytes_move_into_the_archive() {
    let store = MemBlobStore::new();
    store.put_at(".sync-backup/a/f.txt", b"one", "2020-01-01T00:00:00Z");

    let mut conn = open_db_in_memory().expect("open db");
    record_version(&conn, "/a/f.txt", 1, "2020-01-01T00:00:00Z").expect("v1");

    let tx = begin_write(&mut conn).expect("begin");
    let archived = archive_superseded(
        &store,
        &tx,
        "/a/f.txt",
        1,
        ".sync-backup/a/f.txt",
        "archive",
        &RetryPolicy::none(),
    )
    .expect("archive");
    tx.commit().expect("commit");

    let expected = archive_key_for_bytes("/a/f.txt", 1, b"one");
    assert_eq!(archived.archive_key, expected);
    assert_eq!(archived.archive_object, format!("archive/{}", expected.0));
    assert_eq!(store.bytes(&archived.archive_object), Some(b"one".to_vec()));
    assert!(!store.exists(".sync-backup/a/f.txt").expect("exists"));

    let row = latest(&conn, "/a/f.txt").expect("latest");
    assert_eq!(row.archive_key, Some(expected));
    assert!(verify_archive(&store, "archive", &row).expect("verify"));
}

#[test]
fn failed_relocation_rolls_back_the_ledger_update() {
    let store = MemBlobStore::new();
    store.put_at(".sync-backup/a/f.txt", b"one", "2020-01-01T00:00:00Z");
    store.fail_next_renames(1, false);

    let mut conn = open_db_in_memory().expect("open db");
    record_version(&conn, "/a/f.txt", 1, "2020-01-01T00:00:00Z").expect("v1");

    {
        let tx = begin_write(&mut conn).expect("begin");
        let err = archive_superseded(
            &store,
            &tx,
            "/a/f.txt",
            1,
            ".sync-backup/a/f.txt",
            "archive",
            &RetryPolicy::default(),
        )
        .expect_err("relocation fails");
        assert_eq!(err.code, "VL_ARCHIVE_IO_FAILED");
        assert!(!err.retryable);
    }

    assert_eq!(store.rename_calls(), 1);
    assert_eq!(latest(&conn, "/a/f.txt").expect("latest").archive_key, None);
    assert!(store.exists(".sync-backup/a/f.txt").expect("exists"));
}

#[test]
fn retryable_relocation_failures_are_retried() {
    let store = MemBlobStore::new();
    store.put_at(".sync-backup/a/f.txt", b"one", "2020-01-01T00:00:00Z");
    store.fail_next_renames(2, true);

    let mut conn = open_db_in_memory().expect("open db");
    record_version(&conn, "/a/f.txt", 1, "2020-01-01T00:00:00Z").expect("v1");

    let retry = RetryPolicy {
        max_attempts: 3,
        backoff_ms: 0,
    };
    let tx = begin_write(&mut conn).expect("begin");
    archive_superseded(&store, &tx, "/a/f.txt", 1, ".sync-backup/a/f.txt", "archive", &retry)
        .expect("archive after retries");
    tx.commit().expect("commit");

    assert_eq!(store.rename_calls(), 3);
    assert!(latest(&conn, "/a/f.txt").expect("latest").archive_key.is_some());
}

#[test]
fn tampered_archive_fails_verification() {
    let store = MemBlobStore::new();
    let key = archive_key_for_bytes("/a/f.txt", 1, b"one");
    store.put_at(&archive_object_key("archive", &key), b"tampered", "2020-01-01T00:00:00Z");

    let conn = open_db_in_memory().expect("open db");
    record_version(&conn, "/a/f.txt", 1, "2020-01-01T00:00:00Z").expect("v1");
    vl_core::ledger::mark_archived(&conn, "/a/f.txt", 1, &key).expect("mark");

    let row = latest(&conn, "/a/f.txt").expect("latest");
    assert!(!verify_archive(&store, "archive", &row).expect("verify"));
}

#[test]
fn hashing_a_missing_object_reports_archive_failure() {
    let store = MemBlobStore::new();
    let err = compute_archive_key(&store, ".sync-backup/a/f.txt", "/a/f.txt", 1, &RetryPolicy::none())
        .expect_err("missing source");
    assert_eq!(err.code, "VL_ARCHIVE_IO_FAILED");
    assert_eq!(err.details["cause_code"], "VL_OBJECT_NOT_FOUND");
}
