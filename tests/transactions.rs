use quadstore::memory::{MemoryStore, ReadMode, TermPattern};
use quadstore::{
    CommitReport, NativeStore, NativeStoreOptions, Quad, QuadPattern, QuadStoreError, Result, Term,
};
use tempfile::tempdir;

fn ex(name: &str) -> Term {
    Term::uri(format!("http://example.org/{name}"))
}

#[test]
fn native_uncommitted_changes_are_invisible() -> Result<()> {
    let dir = tempdir()?;
    let store = NativeStore::open(dir.path(), NativeStoreOptions::new())?;
    let mut txn = store.begin()?;
    txn.add(Quad::new(1, 2, 3, 0), true)?;
    txn.set_namespace("ex", "http://example.org/")?;
    assert_eq!(txn.len(), 2);
    assert_eq!(store.size()?, 0);
    assert!(store.namespaces()?.is_empty());
    txn.rollback()?;
    assert_eq!(store.size()?, 0);
    Ok(())
}

#[test]
fn native_operations_replay_in_issue_order() -> Result<()> {
    let dir = tempdir()?;
    let store = NativeStore::open(dir.path(), NativeStoreOptions::new())?;
    let mut txn = store.begin()?;
    txn.add(Quad::new(1, 2, 3, 4), true)?;
    txn.clear_all()?;
    txn.add(Quad::new(5, 6, 7, 0), true)?;
    txn.add(Quad::new(5, 6, 8, 4), true)?;
    txn.remove(QuadPattern::any().object(8))?;
    let report = txn.commit()?;
    assert_eq!(report, CommitReport { added: 3, removed: 2 });
    let left: Vec<_> = store.query(QuadPattern::any())?.map(|r| r.quad).collect();
    assert_eq!(left, vec![Quad::new(5, 6, 7, 0)]);
    Ok(())
}

#[test]
fn native_remove_honours_explicit_constraint() -> Result<()> {
    let dir = tempdir()?;
    let store = NativeStore::open(dir.path(), NativeStoreOptions::new())?;
    let mut txn = store.begin()?;
    txn.add(Quad::new(1, 2, 3, 0), true)?;
    txn.add(Quad::new(1, 2, 4, 0), false)?;
    txn.commit()?;

    let mut txn = store.begin()?;
    txn.remove(QuadPattern::any().subject(1).with_explicit(false))?;
    assert_eq!(txn.commit()?.removed, 1);
    let left: Vec<_> = store.query(QuadPattern::any())?.collect();
    assert_eq!(left.len(), 1);
    assert!(left[0].explicit);
    Ok(())
}

#[test]
fn native_empty_commit_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let store = NativeStore::open(dir.path(), NativeStoreOptions::new())?;
    let txn = store.begin()?;
    assert!(txn.is_empty());
    assert_eq!(txn.commit()?, CommitReport::default());
    assert!(!store.txn_lock().is_held());
    Ok(())
}

#[test]
fn native_interrupted_waiter_fails_to_begin() -> Result<()> {
    let dir = tempdir()?;
    let store = NativeStore::open(dir.path(), NativeStoreOptions::new())?;
    let holder = store.begin()?;
    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| store.begin().map(|txn| txn.rollback()));
        while store.txn_lock().waiters() == 0 {
            std::thread::yield_now();
        }
        store.txn_lock().interrupt_waiters();
        assert!(matches!(waiter.join().unwrap(), Err(QuadStoreError::Interrupted)));
    });
    holder.rollback()?;
    Ok(())
}

#[test]
fn memory_status_folding_restores_neutral_state() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    txn.commit()?;

    let pattern = TermPattern::any().subject(ex("x"));
    let mut txn = store.begin()?;
    txn.remove(&pattern, true)?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    assert_eq!(txn.commit()?, CommitReport::default());
    let statements: Vec<_> = store.statements(&pattern)?.collect();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].explicit);
    Ok(())
}

#[test]
fn memory_rollback_restores_explicitness() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, false)?;
    txn.commit()?;

    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    assert_eq!(txn.query(&TermPattern::any(), true)?.count(), 1);
    txn.rollback()?;
    assert_eq!(store.query(&TermPattern::any(), true, ReadMode::Committed)?.count(), 0);
    assert_eq!(store.size()?, 1);
    Ok(())
}

#[test]
fn memory_explicit_remove_cancels_pending_upgrade() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, false)?;
    txn.commit()?;

    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    assert_eq!(txn.remove(&TermPattern::any(), true)?, 0);
    txn.commit()?;
    let statements: Vec<_> = store.statements(&TermPattern::any())?.collect();
    assert_eq!(statements.len(), 1);
    assert!(!statements[0].explicit);
    Ok(())
}

#[test]
fn memory_downgrade_to_inferred() -> Result<()> {
    let store = MemoryStore::in_memory();
    let mut txn = store.begin()?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, true)?;
    txn.commit()?;

    let mut txn = store.begin()?;
    txn.remove(&TermPattern::any(), true)?;
    txn.add(&ex("x"), &ex("p"), &ex("y"), None, false)?;
    assert_eq!(txn.query(&TermPattern::any(), true)?.count(), 0);
    assert_eq!(txn.query(&TermPattern::any(), false)?.count(), 1);
    txn.commit()?;
    let statements: Vec<_> = store.statements(&TermPattern::any())?.collect();
    assert_eq!(statements.len(), 1);
    assert!(!statements[0].explicit);
    Ok(())
}
