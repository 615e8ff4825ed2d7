//! Disk-resident quad store.
//!
//! Mutations issued inside a [`NativeTransaction`] go to a private
//! write-intent log. Commit seals the log, takes the data write lock and
//! replays it against the index permutations, so readers observe either
//! the whole transaction or none of it.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::index::format_index_spec;
use super::namespaces::{NamespaceStore, NamespaceTable};
use super::options::NativeStoreOptions;
use super::record::{RecordBytes, SearchBounds, KEY_LEN};
use super::triples::{QueryPlan, TripleStore};
use super::txn_log::{read_log, LogRecord, TxnLogWriter, LOG_PREFIX, LOG_SUFFIX};
use super::values::{ValueDictionary, ValueStore};
use crate::model::{Namespace, Term};
use crate::primitives::concurrency::{DataLock, DataReadGuard, LockSnapshot, TxnGuard, TxnLock};
use crate::primitives::io::{list_files, remove_if_exists};
use crate::types::{Quad, QuadPattern, QuadRecord, QuadStoreError, Result, ValueId};

/// Effects of a committed transaction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Statements that became present.
    pub added: usize,
    /// Statements that were deleted.
    pub removed: usize,
}

/// Structures guarded by the data lock.
pub struct NativeState {
    triples: TripleStore,
    namespaces: Box<dyn NamespaceStore>,
}

impl NativeState {
    fn apply(&mut self, records: &[LogRecord], redo: bool) -> CommitReport {
        let mut report = CommitReport::default();
        for record in records {
            match record {
                LogRecord::AddStatement { quad, explicit } => {
                    let record = QuadRecord::new(*quad, *explicit);
                    if redo {
                        self.triples.redo_insert(record);
                    } else if self.triples.insert(record).is_none() {
                        report.added += 1;
                    }
                }
                LogRecord::RemoveStatement { pattern } => {
                    report.removed += self.remove(pattern, redo);
                }
                LogRecord::ClearContext { context } => {
                    report.removed += self.remove(&QuadPattern::any().context(*context), redo);
                }
                LogRecord::ClearAll => report.removed += self.triples.clear(),
                LogRecord::SetNamespace { prefix, name } => {
                    self.namespaces.set_namespace(prefix, name);
                }
                LogRecord::RemoveNamespace { prefix } => self.namespaces.remove_namespace(prefix),
            }
        }
        report
    }

    fn remove(&mut self, pattern: &QuadPattern, redo: bool) -> usize {
        if redo {
            self.triples.redo_remove(pattern)
        } else {
            self.triples.remove(pattern)
        }
    }

    fn sync(&mut self) -> Result<()> {
        self.triples.sync()?;
        self.namespaces.sync()
    }
}

/// A disk-resident quad store rooted at one directory.
pub struct NativeStore {
    dir: PathBuf,
    options: NativeStoreOptions,
    txn_lock: TxnLock,
    data: DataLock<NativeState>,
    values: Arc<dyn ValueStore>,
    needs_recovery: AtomicBool,
}

impl NativeStore {
    /// Opens or creates a store in `dir`.
    ///
    /// Index-set changes recorded in `triples.prop` are migrated, and
    /// sealed transaction logs left by an interrupted commit are replayed.
    pub fn open(dir: impl AsRef<Path>, options: NativeStoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let triples = TripleStore::open(&dir, &options.index_spec, options.force_sync)?;
        let namespaces = NamespaceTable::open(&dir, options.force_sync)?;
        let values: Arc<dyn ValueStore> = match &options.value_store {
            Some(values) => Arc::clone(values),
            None => Arc::new(ValueDictionary::open(&dir, options.force_sync)?),
        };
        let mut state = NativeState {
            triples,
            namespaces: Box::new(namespaces),
        };
        recover(&dir, &mut state)?;
        info!(
            dir = %dir.display(),
            indexes = %format_index_spec(&state.triples.orders()),
            statements = state.triples.size(),
            "native.open"
        );
        Ok(Self {
            data: DataLock::new(state, options.lock_timeout),
            dir,
            options,
            txn_lock: TxnLock::new(),
            values,
            needs_recovery: AtomicBool::new(false),
        })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &NativeStoreOptions {
        &self.options
    }

    /// The value store used to intern terms.
    pub fn values(&self) -> &Arc<dyn ValueStore> {
        &self.values
    }

    /// The exclusive transaction lock, e.g. to interrupt blocked `begin`s.
    pub fn txn_lock(&self) -> &TxnLock {
        &self.txn_lock
    }

    /// Starts a transaction, blocking while another one is open.
    pub fn begin(&self) -> Result<NativeTransaction<'_>> {
        if self.needs_recovery.load(Ordering::Acquire) {
            return Err(QuadStoreError::NeedsRecovery);
        }
        let guard = self.txn_lock.acquire(self.options.lock_timeout)?;
        let log = TxnLogWriter::create(&self.dir)?;
        trace!(log = %log.path().display(), "native.begin");
        Ok(NativeTransaction {
            store: self,
            log: Some(log),
            _guard: guard,
        })
    }

    /// Streams records matching `pattern`.
    ///
    /// The iterator holds the data read lock until it is exhausted, closed
    /// or dropped; a commit waits for it.
    pub fn query(&self, pattern: QuadPattern) -> Result<QuadIter> {
        let guard = self.data.read()?;
        let plan = guard.triples.plan(&pattern);
        trace!(index = plan.index, score = plan.score, ranged = plan.ranged, "native.query");
        Ok(QuadIter {
            guard: Some(guard),
            plan,
            bounds: SearchBounds::new(&pattern),
            buffer: VecDeque::new(),
            resume: None,
            started: false,
            batch: self.options.scan_batch.max(1),
        })
    }

    /// The scan a query for `pattern` would use.
    pub fn plan(&self, pattern: &QuadPattern) -> Result<QueryPlan> {
        Ok(self.data.read()?.triples.plan(pattern))
    }

    /// Number of records matching `pattern`.
    pub fn count(&self, pattern: &QuadPattern) -> Result<usize> {
        Ok(self.data.read()?.triples.count(pattern))
    }

    /// Number of stored records.
    pub fn size(&self) -> Result<usize> {
        Ok(self.data.read()?.triples.size())
    }

    /// Distinct non-null contexts.
    pub fn contexts(&self) -> Result<Vec<ValueId>> {
        Ok(self.data.read()?.triples.contexts())
    }

    /// Current index specification.
    pub fn index_spec(&self) -> Result<String> {
        Ok(self.data.read()?.triples.index_spec())
    }

    /// Namespace bound to `prefix`.
    pub fn get_namespace(&self, prefix: &str) -> Result<Option<String>> {
        Ok(self
            .data
            .read()?
            .namespaces
            .get_namespace(prefix)
            .map(str::to_string))
    }

    /// All namespace bindings.
    pub fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.data.read()?.namespaces.namespaces())
    }

    /// Checks that every index permutation holds the same records.
    pub fn verify(&self) -> Result<()> {
        self.data.read()?.triples.verify()
    }

    /// Current lock state.
    pub fn lock_snapshot(&self) -> LockSnapshot {
        self.data.snapshot(&self.txn_lock)
    }

    /// Identifier of `term` if it has been interned.
    pub fn id_of(&self, term: &Term) -> Result<Option<ValueId>> {
        self.values.get_id(term)
    }

    /// Term behind `id`.
    pub fn term(&self, id: ValueId) -> Result<Option<Term>> {
        self.values.get_value(id)
    }
}

fn recover(dir: &Path, state: &mut NativeState) -> Result<()> {
    for path in list_files(dir, LOG_PREFIX, LOG_SUFFIX)? {
        let contents = read_log(&path)?;
        if contents.committed {
            let report = state.apply(&contents.records, true);
            state.triples.mark_all_dirty();
            state.sync()?;
            info!(
                log = %path.display(),
                records = contents.records.len(),
                added = report.added,
                removed = report.removed,
                "native.recover.replay"
            );
        } else {
            info!(log = %path.display(), records = contents.records.len(), "native.recover.discard");
        }
        remove_if_exists(&path)?;
    }
    Ok(())
}

/// An open disk-engine transaction.
///
/// Holds the exclusive transaction lock. Dropping it without committing
/// rolls back.
pub struct NativeTransaction<'a> {
    store: &'a NativeStore,
    log: Option<TxnLogWriter>,
    _guard: TxnGuard,
}

impl NativeTransaction<'_> {
    fn log(&mut self) -> Result<&mut TxnLogWriter> {
        self.log
            .as_mut()
            .ok_or(QuadStoreError::Invalid("transaction already finished"))
    }

    /// Number of operations recorded so far.
    pub fn len(&self) -> u32 {
        self.log.as_ref().map_or(0, TxnLogWriter::len)
    }

    /// True if no operation has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the insertion of `quad`.
    pub fn add(&mut self, quad: Quad, explicit: bool) -> Result<()> {
        self.log()?.append(&LogRecord::AddStatement { quad, explicit })
    }

    /// Interns the terms and records the insertion of the resulting quad.
    pub fn add_terms(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        context: Option<&Term>,
        explicit: bool,
    ) -> Result<Quad> {
        if !subject.is_resource() {
            return Err(QuadStoreError::Invalid("subject must be a URI or blank node"));
        }
        if !predicate.is_uri() {
            return Err(QuadStoreError::Invalid("predicate must be a URI"));
        }
        if context.is_some_and(|c| !c.is_resource()) {
            return Err(QuadStoreError::Invalid("context must be a URI or blank node"));
        }
        let values = &self.store.values;
        let quad = Quad {
            subject: values.store_value(subject)?,
            predicate: values.store_value(predicate)?,
            object: values.store_value(object)?,
            context: match context {
                Some(term) => values.store_value(term)?,
                None => ValueId::NULL_CONTEXT,
            },
        };
        self.add(quad, explicit)?;
        Ok(quad)
    }

    /// Records the removal of every quad matching `pattern`.
    ///
    /// The number of removed quads is only known at commit and is part of
    /// the [`CommitReport`].
    pub fn remove(&mut self, pattern: QuadPattern) -> Result<()> {
        self.log()?.append(&LogRecord::RemoveStatement { pattern })
    }

    /// Records a removal expressed in terms.
    ///
    /// `None` is a wildcard; a `context` of `Some(None)` selects the null
    /// context. Returns false, recording nothing, if a bound term was never
    /// interned and so cannot match.
    pub fn remove_terms(
        &mut self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        context: Option<Option<&Term>>,
        explicit: Option<bool>,
    ) -> Result<bool> {
        let values = Arc::clone(&self.store.values);
        let resolve = |term: Option<&Term>| -> Result<Option<Option<ValueId>>> {
            match term {
                None => Ok(Some(None)),
                Some(term) => Ok(values.get_id(term)?.map(Some)),
            }
        };
        let (Some(subject), Some(predicate), Some(object)) =
            (resolve(subject)?, resolve(predicate)?, resolve(object)?)
        else {
            return Ok(false);
        };
        let context = match context {
            None => None,
            Some(None) => Some(ValueId::NULL_CONTEXT),
            Some(Some(term)) => match values.get_id(term)? {
                Some(id) => Some(id),
                None => return Ok(false),
            },
        };
        let pattern = QuadPattern {
            subject,
            predicate,
            object,
            context,
            explicit,
        };
        self.remove(pattern)?;
        Ok(true)
    }

    /// Records the removal of every quad in `context`.
    pub fn clear_context(&mut self, context: impl Into<ValueId>) -> Result<()> {
        self.log()?.append(&LogRecord::ClearContext {
            context: context.into(),
        })
    }

    /// Records the removal of every quad.
    pub fn clear_all(&mut self) -> Result<()> {
        self.log()?.append(&LogRecord::ClearAll)
    }

    /// Records a namespace binding.
    pub fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()> {
        self.log()?.append(&LogRecord::SetNamespace {
            prefix: prefix.to_string(),
            name: name.to_string(),
        })
    }

    /// Records the removal of a namespace binding.
    pub fn remove_namespace(&mut self, prefix: &str) -> Result<()> {
        self.log()?.append(&LogRecord::RemoveNamespace {
            prefix: prefix.to_string(),
        })
    }

    /// Applies every recorded operation atomically.
    ///
    /// If persisting the indexes fails after replay, the sealed log is kept
    /// for replay at the next open and the store refuses new transactions
    /// with [`QuadStoreError::NeedsRecovery`].
    pub fn commit(mut self) -> Result<CommitReport> {
        let log = self
            .log
            .take()
            .ok_or(QuadStoreError::Invalid("transaction already finished"))?;
        if log.is_empty() {
            log.discard()?;
            return Ok(CommitReport::default());
        }
        let store = self.store;
        let path = log.seal(store.options.force_sync)?;
        let outcome = store.values.sync().and_then(|()| read_log(&path));
        let contents = match outcome {
            Ok(contents) if contents.committed => contents,
            Ok(_) => {
                remove_if_exists(&path)?;
                return Err(QuadStoreError::Corruption("sealed transaction log unreadable"));
            }
            Err(err) => {
                remove_if_exists(&path)?;
                return Err(err);
            }
        };
        let mut data = match store.data.write() {
            Ok(data) => data,
            Err(err) => {
                remove_if_exists(&path)?;
                return Err(err);
            }
        };
        let report = data.apply(&contents.records, false);
        if let Err(err) = data.sync() {
            store.needs_recovery.store(true, Ordering::Release);
            warn!(error = %err, log = %path.display(), "native.commit.persist_failed");
            return Err(err);
        }
        drop(data);
        if let Err(err) = remove_if_exists(&path) {
            warn!(error = %err, log = %path.display(), "native.commit.log_cleanup");
        }
        debug!(
            records = contents.records.len(),
            added = report.added,
            removed = report.removed,
            "native.commit"
        );
        Ok(report)
    }

    /// Discards every recorded operation.
    pub fn rollback(mut self) -> Result<()> {
        if let Some(log) = self.log.take() {
            let records = log.len();
            log.discard()?;
            debug!(records, "native.rollback");
        }
        Ok(())
    }
}

impl Drop for NativeTransaction<'_> {
    fn drop(&mut self) {
        if let Some(log) = self.log.take() {
            if let Err(err) = log.discard() {
                warn!(error = %err, "native.rollback.discard_failed");
            }
        }
    }
}

/// Iterator over the records matching a pattern.
///
/// Holds the data read lock; [`QuadIter::close`] releases it and may be
/// called any number of times. Exhaustion closes the iterator.
pub struct QuadIter {
    guard: Option<DataReadGuard<NativeState>>,
    plan: QueryPlan,
    bounds: SearchBounds,
    buffer: VecDeque<RecordBytes>,
    resume: Option<[u8; KEY_LEN]>,
    started: bool,
    batch: usize,
}

impl QuadIter {
    /// The scan answering this query.
    pub fn plan(&self) -> QueryPlan {
        self.plan
    }

    /// True once the read lock has been released.
    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }

    /// Releases the read lock. Later calls to `next` return `None`.
    pub fn close(&mut self) {
        self.buffer.clear();
        if self.guard.take().is_some() {
            trace!("native.query.close");
        }
    }
}

impl Iterator for QuadIter {
    type Item = QuadRecord;

    fn next(&mut self) -> Option<QuadRecord> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(record.decode());
            }
            let guard = self.guard.as_ref()?;
            if self.started && self.resume.is_none() {
                self.close();
                return None;
            }
            let batch = guard
                .triples
                .scan_batch(&self.plan, &self.bounds, self.resume.as_ref(), self.batch);
            self.started = true;
            self.resume = batch.resume;
            self.buffer.extend(batch.records);
        }
    }
}
