#![allow(missing_docs)]

use quadstore::storage::index::{FieldOrder, QuadIndex};
use quadstore::storage::{LogRecord, RecordBytes, TxnLogWriter, LOG_PREFIX, LOG_SUFFIX};
use quadstore::{NativeStore, NativeStoreOptions, Quad, QuadPattern, QuadRecord, Result, ValueId};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn open(dir: &Path) -> Result<NativeStore> {
    NativeStore::open(dir, NativeStoreOptions::new().index_spec("spoc,posc"))
}

fn leftover_logs(dir: &Path) -> usize {
    fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with(LOG_PREFIX) && name.ends_with(LOG_SUFFIX)
        })
        .count()
}

#[test]
fn sealed_log_is_replayed_at_open() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    {
        let store = open(dir.path())?;
        let mut txn = store.begin()?;
        txn.add(Quad::new(1, 2, 3, 0), true)?;
        txn.commit()?;
    }

    let mut log = TxnLogWriter::create(dir.path())?;
    log.append(&LogRecord::AddStatement {
        quad: Quad::new(4, 5, 6, 7),
        explicit: true,
    })?;
    log.append(&LogRecord::RemoveStatement {
        pattern: QuadPattern::any().subject(1),
    })?;
    log.append(&LogRecord::SetNamespace {
        prefix: "ex".into(),
        name: "http://example.org/".into(),
    })?;
    log.seal(true)?;
    // simulate a crash between sealing and replay

    let store = open(dir.path())?;
    let all: Vec<_> = store.query(QuadPattern::any())?.map(|r| r.quad).collect();
    assert_eq!(all, vec![Quad::new(4, 5, 6, 7)]);
    assert_eq!(store.get_namespace("ex")?.as_deref(), Some("http://example.org/"));
    store.verify()?;
    assert_eq!(leftover_logs(dir.path()), 0);
    Ok(())
}

#[test]
fn unsealed_log_is_discarded() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    drop(open(dir.path())?);

    let mut log = TxnLogWriter::create(dir.path())?;
    log.append(&LogRecord::AddStatement {
        quad: Quad::new(1, 1, 1, 0),
        explicit: true,
    })?;
    drop(log); // crash before commit

    let store = open(dir.path())?;
    assert_eq!(store.size()?, 0);
    assert_eq!(leftover_logs(dir.path()), 0);
    Ok(())
}

#[test]
fn replay_repairs_partially_updated_permutations() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    {
        let store = open(dir.path())?;
        let mut txn = store.begin()?;
        txn.add(Quad::new(1, 2, 3, 0), true)?;
        txn.add(Quad::new(8, 2, 9, 0), true)?;
        txn.commit()?;
    }

    // The commit below reached the posc file but not the spoc file.
    let added = QuadRecord::new(Quad::new(4, 5, 6, 0), true);
    {
        let mut posc = QuadIndex::open(dir.path(), FieldOrder::parse("posc")?)?;
        posc.insert(RecordBytes::encode(&added));
        posc.remove(&RecordBytes::encode(&QuadRecord::new(Quad::new(8, 2, 9, 0), true)));
        posc.sync(true)?;
    }
    let mut log = TxnLogWriter::create(dir.path())?;
    log.append(&LogRecord::AddStatement {
        quad: added.quad,
        explicit: true,
    })?;
    log.append(&LogRecord::RemoveStatement {
        pattern: QuadPattern::any().subject(8),
    })?;
    log.seal(true)?;

    let store = open(dir.path())?;
    store.verify()?;
    let mut all: Vec<_> = store.query(QuadPattern::any())?.map(|r| r.quad).collect();
    all.sort_by_key(|q| q.subject);
    assert_eq!(all, vec![Quad::new(1, 2, 3, 0), Quad::new(4, 5, 6, 0)]);
    assert_eq!(store.count(&QuadPattern::any().predicate(5))?, 1);
    Ok(())
}

#[test]
fn replaying_an_already_applied_log_is_harmless() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let records = [
        LogRecord::AddStatement {
            quad: Quad::new(1, 2, 3, 0),
            explicit: false,
        },
        LogRecord::AddStatement {
            quad: Quad::new(1, 2, 3, 0),
            explicit: true,
        },
        LogRecord::ClearContext { context: ValueId(9) },
    ];
    {
        let store = open(dir.path())?;
        let mut txn = store.begin()?;
        txn.add(Quad::new(1, 2, 3, 0), true)?;
        txn.add(Quad::new(5, 5, 5, 9), true)?;
        txn.commit()?;
        let mut txn = store.begin()?;
        txn.clear_context(9)?;
        txn.commit()?;
    }
    // The indexes already reflect the log, but the log itself survived.
    let mut log = TxnLogWriter::create(dir.path())?;
    for record in &records {
        log.append(record)?;
    }
    log.seal(false)?;

    let store = open(dir.path())?;
    store.verify()?;
    let all: Vec<_> = store.query(QuadPattern::any())?.collect();
    assert_eq!(all, vec![QuadRecord::new(Quad::new(1, 2, 3, 0), true)]);
    Ok(())
}
