#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use quadstore::memory::{MemoryStore, MemoryStoreOptions};
use quadstore::{NativeStore, NativeStoreOptions, Term};
use serde_json::Value;
use tempfile::TempDir;

fn ex(name: &str) -> Term {
    Term::uri(format!("http://example.org/{name}"))
}

fn seed_store(dir: &Path) {
    let store = NativeStore::open(dir, NativeStoreOptions::new().index_spec("spoc,posc"))
        .expect("open store");
    let mut txn = store.begin().expect("begin");
    txn.set_namespace("ex", "http://example.org/").expect("namespace");
    txn.add_terms(&ex("alice"), &ex("knows"), &ex("bob"), None, true)
        .expect("add");
    txn.add_terms(&ex("bob"), &ex("knows"), &ex("carol"), Some(&ex("g")), true)
        .expect("add");
    txn.add_terms(&ex("alice"), &ex("name"), &Term::literal("Alice"), None, false)
        .expect("add");
    txn.commit().expect("commit");
}

fn setup() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path().join("store");
    seed_store(&dir);
    (tmp, dir)
}

fn run_json(args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("quadstore")
        .args(["--format", "json"])
        .args(args)
        .output()
        .expect("run cli");
    assert!(
        output.status.success(),
        "cli failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn info_reports_counts_and_namespaces() {
    let (_tmp, dir) = setup();
    let report = run_json(&["info", dir.to_str().expect("utf8 path")]);
    assert_eq!(report["statements"], 3);
    assert_eq!(report["contexts"], 1);
    assert_eq!(report["indexes"], "spoc,posc");
    assert_eq!(report["schema_version"], 10);
    assert_eq!(report["namespaces"][0][0], "ex");

    let output = cargo_bin_cmd!("quadstore")
        .args(["info", dir.to_str().expect("utf8 path")])
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("statements=3 contexts=1"), "unexpected output: {text}");
    assert!(text.contains("@prefix ex: <http://example.org/>"));
}

#[test]
fn query_uses_the_best_permutation() {
    let (_tmp, dir) = setup();
    let dir_arg = dir.to_str().expect("utf8 path");
    let all = run_json(&["query", dir_arg]);
    assert_eq!(all["total"], 3);
    assert_eq!(all["ranged"], false);

    let first = &all["rows"][0];
    let predicate = first["predicate"].as_u64().expect("predicate id").to_string();
    let by_predicate = run_json(&["query", dir_arg, "-p", &predicate]);
    assert_eq!(by_predicate["index"], "posc");
    assert_eq!(by_predicate["score"], 1);
    assert_eq!(by_predicate["ranged"], true);
    for row in by_predicate["rows"].as_array().expect("rows") {
        assert_eq!(row["predicate"].as_u64(), first["predicate"].as_u64());
        assert!(row["terms"].is_array());
    }

    let inferred = run_json(&["query", dir_arg, "--explicit", "false"]);
    assert_eq!(inferred["total"], 1);
    assert_eq!(inferred["rows"][0]["terms"][2], "\"Alice\"");

    let limited = run_json(&["query", dir_arg, "--limit", "1"]);
    assert_eq!(limited["total"], 3);
    assert_eq!(limited["rows"].as_array().expect("rows").len(), 1);
}

#[test]
fn reindex_rebuilds_permutations() {
    let (_tmp, dir) = setup();
    let dir_arg = dir.to_str().expect("utf8 path");
    let report = run_json(&["reindex", dir_arg, "--indexes", "spoc, opsc, cspo"]);
    assert_eq!(report["before"], "spoc,posc");
    assert_eq!(report["after"], "spoc,opsc,cspo");
    assert_eq!(report["statements"], 3);

    let store = NativeStore::open(&dir, NativeStoreOptions::new().index_spec("spoc,opsc,cspo"))
        .expect("reopen");
    store.verify().expect("verify");
    assert_eq!(store.size().expect("size"), 3);
}

#[test]
fn snapshot_info_summarises_memory_snapshots() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("memorystore.data");
    {
        let store = MemoryStore::open(MemoryStoreOptions::new().snapshot(&path)).expect("open");
        let mut txn = store.begin().expect("begin");
        txn.set_namespace("ex", "http://example.org/").expect("namespace");
        txn.add(&ex("a"), &ex("p"), &ex("b"), Some(&ex("g1")), true)
            .expect("add");
        txn.add(&ex("a"), &ex("p"), &ex("c"), Some(&ex("g2")), false)
            .expect("add");
        txn.add(&ex("a"), &ex("p"), &ex("d"), None, true).expect("add");
        txn.commit().expect("commit");
        store.shutdown().expect("shutdown");
    }

    let report = run_json(&["snapshot-info", path.to_str().expect("utf8 path")]);
    assert_eq!(report["explicit"], 2);
    assert_eq!(report["inferred"], 1);
    assert_eq!(report["contexts"], 2);
    assert_eq!(report["namespaces"], 1);
}

#[test]
fn non_store_directories_are_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    let output = cargo_bin_cmd!("quadstore")
        .args(["info", tmp.path().to_str().expect("utf8 path")])
        .output()
        .expect("run cli");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("is not a quadstore directory"), "stderr: {stderr}");
}

#[test]
fn malformed_index_spec_fails_cleanly() {
    let (_tmp, dir) = setup();
    cargo_bin_cmd!("quadstore")
        .args(["reindex", dir.to_str().expect("utf8 path"), "--indexes", "spoq"])
        .assert()
        .failure()
        .code(1);
}
