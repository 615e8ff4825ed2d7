use quadstore::memory::{MemoryStore, MemoryStoreOptions, ReadMode, SyncDelay, TermPattern};
use quadstore::{Result, Term};
use std::fs;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn ex(name: &str) -> Term {
    Term::uri(format!("http://example.org/{name}"))
}

fn visible(store: &MemoryStore, mode: ReadMode) -> Result<usize> {
    Ok(store.query(&TermPattern::any(), false, mode)?.count())
}

#[test]
fn uncommitted_add_is_only_visible_in_transaction_mode() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    assert_eq!(visible(&store, ReadMode::Committed)?, 0);
    assert_eq!(visible(&store, ReadMode::Transaction)?, 1);
    txn.commit()?;
    assert_eq!(visible(&store, ReadMode::Committed)?, 1);
    Ok(())
}

#[test]
fn rolled_back_add_is_never_visible() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), Some(&ex("g")), true)?;
    txn.rollback()?;
    for mode in [ReadMode::Committed, ReadMode::Transaction, ReadMode::Raw] {
        assert_eq!(visible(&store, mode)?, 0);
    }
    Ok(())
}

#[test]
fn dropped_transaction_rolls_back() -> Result<()> {
    let store = MemoryStore::in_memory();
    {
        let mut txn = store.begin()?;
        txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    }
    assert_eq!(visible(&store, ReadMode::Raw)?, 0);
    assert!(!store.txn_lock().is_held());
    Ok(())
}

#[test]
fn removal_stays_visible_to_committed_readers_until_commit() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    txn.commit()?;

    let mut txn = store.begin()?;
    assert_eq!(txn.remove(&TermPattern::any().subject(ex("x")), true)?, 1);
    assert_eq!(visible(&store, ReadMode::Committed)?, 1);
    assert_eq!(visible(&store, ReadMode::Transaction)?, 0);
    let report = txn.commit()?;
    assert_eq!(report.removed, 1);
    assert_eq!(visible(&store, ReadMode::Raw)?, 0);
    Ok(())
}

#[test]
fn add_then_remove_in_one_transaction_leaves_nothing() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    txn.remove(&TermPattern::any(), true)?;
    assert_eq!(visible(&store, ReadMode::Transaction)?, 0);
    let report = txn.commit()?;
    assert_eq!((report.added, report.removed), (0, 0));
    assert_eq!(visible(&store, ReadMode::Raw)?, 0);
    assert_eq!(store.term_count()?, 0);
    Ok(())
}

#[test]
fn inferred_statements_are_cleared_separately() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("a"), &ex("type"), &ex("Person"), None, true)?;
    txn.add(&ex("a"), &ex("type"), &ex("Agent"), None, false)?;
    txn.commit()?;
    assert_eq!(store.query(&TermPattern::any(), true, ReadMode::Committed)?.count(), 1);

    let mut txn = store.begin()?;
    assert_eq!(txn.clear_inferred()?, 1);
    txn.commit()?;
    let left: Vec<_> = store.statements(&TermPattern::any())?.collect();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].object, ex("Person"));
    Ok(())
}

#[test]
fn context_filters_select_graphs() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("a"), &ex("p"), &ex("b"), None, true)?;
    txn.add(&ex("a"), &ex("p"), &ex("b"), Some(&ex("g1")), true)?;
    txn.add(&ex("a"), &ex("p"), &ex("c"), Some(&ex("g2")), true)?;
    txn.commit()?;

    let default_graph = TermPattern::any().context(None);
    assert_eq!(store.count(&default_graph, ReadMode::Committed)?, 1);
    let g1 = TermPattern::any().context(Some(ex("g1")));
    assert_eq!(store.count(&g1, ReadMode::Committed)?, 1);
    assert_eq!(store.contexts()?, vec![ex("g1"), ex("g2")]);

    let mut txn = store.begin()?;
    assert_eq!(txn.clear_context(Some(&ex("g1")))?, 1);
    txn.commit()?;
    assert_eq!(store.size()?, 2);
    assert_eq!(store.contexts()?, vec![ex("g2")]);
    Ok(())
}

#[test]
fn unknown_terms_match_nothing() -> Result<()> {
    let store = MemoryStore::in_memory();
    let pattern = TermPattern::any().subject(ex("nobody"));
    let mut iter = store.statements(&pattern)?;
    assert!(iter.is_closed());
    assert!(iter.next().is_none());
    assert_eq!(store.lock_snapshot().readers, 0);
    Ok(())
}

#[test]
fn snapshot_persists_committed_state() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested").join("memorystore.data");
    let options = MemoryStoreOptions::new().snapshot(&path);
    {
        let store = MemoryStore::open(options.clone())?;
        assert!(path.exists());
        let mut txn = store.begin()?;
        txn.set_namespace("ex", "http://example.org/")?;
        txn.add(&ex("a"), &ex("name"), &Term::lang_literal("Ada", "en"), None, true)?;
        txn.add(&ex("a"), &ex("knows"), &Term::bnode("b1"), Some(&ex("g")), false)?;
        txn.commit()?;
        store.shutdown()?;
    }
    let store = MemoryStore::open(options)?;
    assert_eq!(store.size()?, 2);
    assert_eq!(store.get_namespace("ex")?.as_deref(), Some("http://example.org/"));
    let explicit = store.query(&TermPattern::any(), true, ReadMode::Committed)?.count();
    assert_eq!(explicit, 1);
    Ok(())
}

#[test]
fn empty_snapshot_file_is_ignored() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("memorystore.data");
    fs::write(&path, b"")?;
    let store = MemoryStore::open(MemoryStoreOptions::new().snapshot(&path))?;
    assert_eq!(store.size()?, 0);
    Ok(())
}

#[test]
fn delayed_sync_writes_after_quiet_period() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("memorystore.data");
    let options = MemoryStoreOptions::new()
        .snapshot(&path)
        .sync_delay(SyncDelay::After(Duration::from_millis(50)));
    let store = MemoryStore::open(options)?;
    let mut txn = store.begin()?;
    txn.add(&ex("a"), &ex("p"), &ex("b"), None, true)?;
    txn.commit()?;
    assert_eq!(fs::metadata(&path)?.len(), 0);

    let mut written = false;
    for _ in 0..100 {
        thread::sleep(Duration::from_millis(20));
        if fs::metadata(&path)?.len() > 0 {
            written = true;
            break;
        }
    }
    assert!(written, "delayed sync never wrote the snapshot");
    Ok(())
}

#[test]
fn deferred_sync_writes_on_shutdown() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("memorystore.data");
    let options = MemoryStoreOptions::new()
        .snapshot(&path)
        .sync_delay(SyncDelay::OnShutdown);
    let store = MemoryStore::open(options.clone())?;
    let mut txn = store.begin()?;
    txn.add(&ex("a"), &ex("p"), &ex("b"), None, true)?;
    txn.commit()?;
    assert_eq!(fs::metadata(&path)?.len(), 0);
    drop(store);
    assert!(fs::metadata(&path)?.len() > 0);
    assert_eq!(MemoryStore::open(options)?.size()?, 1);
    Ok(())
}

#[test]
fn immediate_sync_writes_on_commit() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("memorystore.data");
    let store = MemoryStore::open(MemoryStoreOptions::new().snapshot(&path))?;
    let mut txn = store.begin()?;
    txn.add(&ex("a"), &ex("p"), &ex("b"), None, true)?;
    txn.commit()?;
    let snapshot = quadstore::memory::load_snapshot(&path)?;
    assert_eq!(snapshot.explicit_count(), 1);
    Ok(())
}

#[test]
fn strings_past_sixty_four_kib_persist() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("memorystore.data");
    let options = MemoryStoreOptions::new().snapshot(&path);
    let long = Term::literal("x".repeat(70_000));
    let long_ns = format!("urn:{}", "n".repeat(70_000));
    {
        let store = MemoryStore::open(options.clone())?;
        let mut txn = store.begin()?;
        txn.set_namespace("long", &long_ns)?;
        txn.add(&ex("a"), &ex("p"), &long, None, true)?;
        txn.commit()?;

        let mut txn = store.begin()?;
        txn.add(&ex("b"), &ex("p"), &ex("c"), None, true)?;
        txn.commit()?;
        store.shutdown()?;
    }
    let store = MemoryStore::open(options)?;
    assert_eq!(store.size()?, 2);
    assert_eq!(store.get_namespace("long")?.as_deref(), Some(long_ns.as_str()));
    let pattern = TermPattern::any().object(long);
    assert_eq!(store.query(&pattern, true, ReadMode::Committed)?.count(), 1);
    Ok(())
}

#[test]
fn failed_immediate_sync_does_not_fail_commit() -> Result<()> {
    let dir = tempdir()?;
    let nested = dir.path().join("nested");
    let path = nested.join("memorystore.data");
    let store = MemoryStore::open(MemoryStoreOptions::new().snapshot(&path))?;
    fs::remove_dir_all(&nested)?;

    let mut txn = store.begin()?;
    txn.add(&ex("a"), &ex("p"), &ex("b"), None, true)?;
    let report = txn.commit()?;
    assert_eq!(report.added, 1);
    assert_eq!(visible(&store, ReadMode::Committed)?, 1);
    assert!(store.sync().is_err());

    let mut txn = store.begin()?;
    txn.add(&ex("c"), &ex("p"), &ex("d"), None, true)?;
    txn.commit()?;

    fs::create_dir_all(&nested)?;
    store.sync()?;
    let snapshot = quadstore::memory::load_snapshot(&path)?;
    assert_eq!(snapshot.explicit_count(), 2);
    Ok(())
}
