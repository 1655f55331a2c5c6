use rusqlite::Connection;
use std::collections::BTreeMap;
use vl_core::db::open_db_in_memory;
use vl_core::hashing::archive_key_for_bytes;
use vl_core::ledger::{history, mark_archived, record_tombstone, record_version};
use vl_core::reconstruct::{content_key, reconstruct_at, snapshot_at, ListingScope};

fn seeded() -> Connection {
    let conn = open_db_in_memory().expect("open db");
    record_version(&conn, "/a/f.txt", 1, "2020-01-01T00:00:00Z").expect("f v1");
    mark_archived(&conn, "/a/f.txt", 1, &archive_key_for_bytes("/a/f.txt", 1, b"one")).expect("archive f v1");
    record_version(&conn, "/a/f.txt", 2, "2020-02-01T00:00:00Z").expect("f v2");
    record_version(&conn, "/a/g.txt", 1, "2020-01-10T00:00:00Z").expect("g v1");
    record_version(&conn, "/a/sub/h.txt", 1, "2020-01-05T00:00:00Z").expect("h v1");
    record_version(&conn, "/ab/x.txt", 1, "2020-01-01T00:00:00Z").expect("x v1");
    record_version(&conn, "/a/gone.txt", 1, "2020-01-01T00:00:00Z").expect("gone v1");
    mark_archived(&conn, "/a/gone.txt", 1, &archive_key_for_bytes("/a/gone.txt", 1, b"bye")).expect("archive gone v1");
    record_tombstone(&conn, "/a/gone.txt", 2, "2020-01-20T00:00:00Z").expect("gone v2");
    conn
}

fn snapshot(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
    pairs.iter().map(|(p, v)| (p.to_string(), *v)).collect()
}

#[test]
fn reconstructs_direct_children_at_each_time() {
    let conn = seeded();

    let jan = snapshot_at(&conn, "/a/", "2020-01-15", ListingScope::Children).expect("jan");
    assert_eq!(jan, snapshot(&[("/a/f.txt", 1), ("/a/g.txt", 1), ("/a/gone.txt", 1)]));

    let feb = snapshot_at(&conn, "/a", "2020-02-15", ListingScope::Children).expect("feb");
    assert_eq!(feb, snapshot(&[("/a/f.txt", 2), ("/a/g.txt", 1)]));
}

#[test]
fn sibling_directories_sharing_a_name_prefix_are_excluded() {
    let conn = seeded();
    let out = snapshot_at(&conn, "/a", "2020-12-31", ListingScope::Recursive).expect("recursive");
    assert!(!out.contains_key("/ab/x.txt"));
    assert_eq!(out.get("/a/sub/h.txt"), Some(&1));

    let ab = snapshot_at(&conn, "/ab", "2020-12-31", ListingScope::Children).expect("ab");
    assert_eq!(ab, snapshot(&[("/ab/x.txt", 1)]));
}

#[test]
fn entries_carry_the_archive_key_of_superseded_versions() {
    let conn = seeded();

    let jan = reconstruct_at(&conn, "/a", "2020-01-15", ListingScope::Children).expect("jan");
    let f1 = &jan["/a/f.txt"];
    let key = archive_key_for_bytes("/a/f.txt", 1, b"one");
    assert_eq!(f1.archive_key.as_ref(), Some(&key));
    assert_eq!(content_key(f1, "archive"), format!("archive/{}", key.0));

    let feb = reconstruct_at(&conn, "/a", "2020-02-15", ListingScope::Children).expect("feb");
    let f2 = &feb["/a/f.txt"];
    assert!(f2.archive_key.is_none());
    assert_eq!(content_key(f2, "archive"), "a/f.txt");
}

#[test]
fn every_reconstructed_entry_is_the_max_version_at_or_before_the_time() {
    let conn = seeded();
    let as_of = "2020-01-25";
    let out = reconstruct_at(&conn, "/a", as_of, ListingScope::Recursive).expect("reconstruct");

    for (path, entry) in &out {
        assert!(entry.modified_at.as_str() <= as_of);
        let newer_in_effect = history(&conn, path)
            .expect("history")
            .into_iter()
            .any(|e| e.version > entry.version && e.modified_at.as_str() <= as_of);
        assert!(!newer_in_effect, "{} has a newer version in effect", path);
    }
}

#[test]
fn empty_and_invalid_queries_are_distinguished() {
    let conn = seeded();

    let empty = reconstruct_at(&conn, "/a", "2019-12-01", ListingScope::Children).expect_err("before history");
    assert_eq!(empty.code, "VL_NO_RESULTS_AT_TIME");
    assert!(empty.is_empty_result());

    let unknown = reconstruct_at(&conn, "/nowhere", "2020-12-31", ListingScope::Children).expect_err("unknown dir");
    assert_eq!(unknown.code, "VL_NO_RESULTS_AT_TIME");

    let invalid = reconstruct_at(&conn, "/a", "soon", ListingScope::Children).expect_err("invalid time");
    assert_eq!(invalid.code, "VL_QUERY_INVALID_TIME");
    assert!(!invalid.is_empty_result());
}

#[test]
fn same_day_versions_count_with_a_space_separated_time() {
    let conn = open_db_in_memory().expect("open db");
    record_version(&conn, "/a/f.txt", 1, "2020-01-01T00:00:00Z").expect("v1");
    record_version(&conn, "/a/f.txt", 2, "2020-02-15T08:00:00Z").expect("v2");

    let noon = snapshot_at(&conn, "/a", "2020-02-15 12:00:00", ListingScope::Children).expect("noon");
    assert_eq!(noon, snapshot(&[("/a/f.txt", 2)]));

    let garbage = snapshot_at(&conn, "/a", "2020-02-15garbage", ListingScope::Children).expect_err("garbage");
    assert_eq!(garbage.code, "VL_QUERY_INVALID_TIME");
}
