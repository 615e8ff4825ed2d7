//! Memory engine.
//!
//! Statements live in a slab with per-term adjacency lists. An open
//! transaction tags the statements it touches with a [`TxnStatus`]; readers
//! choose through [`ReadMode`] whether they see those pending changes.
//! Commit and rollback fold the tags back to `Neutral` under the data write
//! lock.

mod iter;
mod options;
mod snapshot;
mod statement;
mod sync;
mod values;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub use iter::{StatementIter, TermPattern};
pub use options::{MemoryStoreOptions, SyncDelay};
pub use snapshot::{load as load_snapshot, Snapshot, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use statement::{ReadMode, Statement, TxnStatus};

use self::iter::ResolvedPattern;
use self::statement::{MemStatement, StatementId, StatementKey, StatementTable};
use self::sync::SyncScheduler;
use self::values::TermRegistry;
use crate::model::{Namespace, Term};
use crate::primitives::concurrency::{DataLock, LockSnapshot, TxnGuard, TxnLock};
use crate::storage::{CommitReport, NamespaceStore, NamespaceTable};
use crate::types::{Field, QuadStoreError, Result};

/// Structures guarded by the data lock.
pub struct MemoryState {
    terms: TermRegistry,
    statements: StatementTable,
    namespaces: NamespaceTable,
}

impl MemoryState {
    fn new() -> Self {
        Self {
            terms: TermRegistry::new(),
            statements: StatementTable::new(),
            namespaces: NamespaceTable::in_memory(),
        }
    }

    fn key(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        context: Option<&Term>,
    ) -> Result<StatementKey> {
        Ok(StatementKey {
            subject: self.terms.intern(subject)?,
            predicate: self.terms.intern(predicate)?,
            object: self.terms.intern(object)?,
            context: context.map(|c| self.terms.intern(c)).transpose()?,
        })
    }

    fn link(&mut self, key: StatementKey, id: StatementId) {
        self.terms.link(key.subject, Field::Subject, id);
        self.terms.link(key.predicate, Field::Predicate, id);
        self.terms.link(key.object, Field::Object, id);
        if let Some(context) = key.context {
            self.terms.link(context, Field::Context, id);
        }
    }

    fn unlink(&mut self, id: StatementId) {
        if let Some(st) = self.statements.remove(id) {
            let key = st.key;
            self.terms.unlink(key.subject, Field::Subject, id);
            self.terms.unlink(key.predicate, Field::Predicate, id);
            self.terms.unlink(key.object, Field::Object, id);
            if let Some(context) = key.context {
                self.terms.unlink(context, Field::Context, id);
            }
        }
    }

    /// Adds with transaction status tagging. Returns true if the statement
    /// became present or explicit in the transaction view.
    fn add(&mut self, key: StatementKey, explicit: bool) -> Result<bool> {
        if let Some(id) = self.statements.find(&key) {
            return Ok(self
                .statements
                .get_mut(id)
                .is_some_and(|st| st.apply_add(explicit)));
        }
        let id = self.statements.insert(MemStatement {
            key,
            explicit,
            status: TxnStatus::New,
        })?;
        self.link(key, id);
        Ok(true)
    }

    /// Inserts a committed statement, as read from a snapshot.
    fn load(&mut self, st: &Statement) -> Result<()> {
        let key = self.key(&st.subject, &st.predicate, &st.object, st.context.as_ref())?;
        match self.statements.find(&key) {
            Some(id) => {
                if let Some(existing) = self.statements.get_mut(id) {
                    existing.explicit |= st.explicit;
                }
            }
            None => {
                let id = self.statements.insert(MemStatement {
                    key,
                    explicit: st.explicit,
                    status: TxnStatus::Neutral,
                })?;
                self.link(key, id);
            }
        }
        Ok(())
    }

    fn remove(&mut self, pattern: &TermPattern, explicit: bool) -> usize {
        let Some(resolved) = ResolvedPattern::resolve(pattern, &self.terms) else {
            return 0;
        };
        let mut cursor = resolved.cursor(&self.terms);
        let mut matched = Vec::new();
        while let Some(id) = cursor.advance(&self.terms, &self.statements) {
            if let Some(st) = self.statements.get(id) {
                if resolved.matches(st) && st.is_visible(ReadMode::Transaction, explicit) {
                    matched.push(id);
                }
            }
        }
        matched
            .into_iter()
            .filter(|id| {
                self.statements
                    .get_mut(*id)
                    .is_some_and(|st| st.apply_remove(explicit))
            })
            .count()
    }

    fn pending(&self) -> Vec<(StatementId, TxnStatus)> {
        self.statements
            .iter()
            .filter(|(_, st)| st.status != TxnStatus::Neutral)
            .map(|(id, st)| (id, st.status))
            .collect()
    }

    fn commit(&mut self) -> CommitReport {
        let mut report = CommitReport::default();
        for (id, status) in self.pending() {
            match status {
                TxnStatus::New => {
                    report.added += 1;
                    self.finalize(id, None);
                }
                TxnStatus::Explicit => self.finalize(id, Some(true)),
                TxnStatus::Inferred => self.finalize(id, Some(false)),
                TxnStatus::Deprecated => {
                    report.removed += 1;
                    self.unlink(id);
                }
                TxnStatus::Zombie => self.unlink(id),
                TxnStatus::Neutral => {}
            }
        }
        report
    }

    fn rollback(&mut self) -> usize {
        let pending = self.pending();
        for (id, status) in &pending {
            match status {
                TxnStatus::New | TxnStatus::Zombie => self.unlink(*id),
                _ => self.finalize(*id, None),
            }
        }
        pending.len()
    }

    fn finalize(&mut self, id: StatementId, explicit: Option<bool>) {
        if let Some(st) = self.statements.get_mut(id) {
            st.status = TxnStatus::Neutral;
            if let Some(explicit) = explicit {
                st.explicit = explicit;
            }
        }
    }

    fn resolve(&self, st: &MemStatement) -> Option<Statement> {
        let term = |id| self.terms.term(id).cloned();
        Some(Statement {
            subject: term(st.key.subject)?,
            predicate: term(st.key.predicate)?,
            object: term(st.key.object)?,
            context: match st.key.context {
                Some(id) => Some(term(id)?),
                None => None,
            },
            explicit: st.explicit,
        })
    }

    fn committed(&self) -> Vec<Statement> {
        self.statements
            .iter()
            .filter(|(_, st)| st.is_visible(ReadMode::Committed, false))
            .filter_map(|(_, st)| self.resolve(st))
            .collect()
    }

    fn count(&self, pattern: &TermPattern, mode: ReadMode, explicit_only: bool) -> usize {
        let Some(resolved) = ResolvedPattern::resolve(pattern, &self.terms) else {
            return 0;
        };
        let mut cursor = resolved.cursor(&self.terms);
        let mut count = 0;
        while let Some(id) = cursor.advance(&self.terms, &self.statements) {
            if self
                .statements
                .get(id)
                .is_some_and(|st| resolved.matches(st) && st.is_visible(mode, explicit_only))
            {
                count += 1;
            }
        }
        count
    }
}

struct MemoryInner {
    options: MemoryStoreOptions,
    txn_lock: TxnLock,
    data: DataLock<MemoryState>,
    dirty: AtomicBool,
    sync_lock: Mutex<()>,
}

impl MemoryInner {
    /// Writes the committed view to the snapshot file if it changed.
    fn sync(&self) -> Result<()> {
        let Some(path) = &self.options.snapshot else {
            return Ok(());
        };
        let _serial = self.sync_lock.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let written = self.data.read().and_then(|data| {
            snapshot::save(
                path,
                self.options.force_sync,
                &data.namespaces.namespaces(),
                &data.committed(),
            )
        });
        if let Err(err) = written {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }
}

/// An in-memory quad store, optionally persisted to a snapshot file.
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
    scheduler: Option<SyncScheduler>,
    closed: bool,
}

impl MemoryStore {
    /// Opens a store with `options`, loading the snapshot file if one is
    /// configured. A configured file that does not exist is created.
    pub fn open(options: MemoryStoreOptions) -> Result<Self> {
        let mut state = MemoryState::new();
        if let Some(path) = &options.snapshot {
            prepare_snapshot_file(path)?;
            let snapshot = snapshot::load(path)?;
            for ns in &snapshot.namespaces {
                state.namespaces.set_namespace(&ns.prefix, &ns.name);
            }
            for st in &snapshot.statements {
                state.load(st)?;
            }
        }
        info!(
            snapshot = ?options.snapshot,
            statements = state.statements.len(),
            sync_delay = ?options.sync_delay,
            "memory.open"
        );
        let inner = Arc::new(MemoryInner {
            data: DataLock::new(state, options.lock_timeout),
            txn_lock: TxnLock::new(),
            dirty: AtomicBool::new(false),
            sync_lock: Mutex::new(()),
            options,
        });
        let scheduler = match (&inner.options.snapshot, inner.options.sync_delay) {
            (Some(_), SyncDelay::After(delay)) => {
                let target = Arc::clone(&inner);
                Some(SyncScheduler::spawn(delay, move || {
                    if let Err(err) = target.sync() {
                        warn!(error = %err, "memory.sync.failed");
                    }
                })?)
            }
            _ => None,
        };
        Ok(Self {
            inner,
            scheduler,
            closed: false,
        })
    }

    /// A volatile store.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                data: DataLock::new(MemoryState::new(), None),
                txn_lock: TxnLock::new(),
                dirty: AtomicBool::new(false),
                sync_lock: Mutex::new(()),
                options: MemoryStoreOptions::default(),
            }),
            scheduler: None,
            closed: false,
        }
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &MemoryStoreOptions {
        &self.inner.options
    }

    /// The exclusive transaction lock.
    pub fn txn_lock(&self) -> &TxnLock {
        &self.inner.txn_lock
    }

    /// Starts a transaction, blocking while another one is open. Cancels
    /// a pending delayed sync.
    pub fn begin(&self) -> Result<MemoryTransaction<'_>> {
        let guard = self.inner.txn_lock.acquire(self.inner.options.lock_timeout)?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel();
        }
        Ok(MemoryTransaction {
            store: self,
            _guard: guard,
            finished: false,
        })
    }

    /// Streams statements matching `pattern` as seen in `mode`.
    pub fn query(
        &self,
        pattern: &TermPattern,
        explicit_only: bool,
        mode: ReadMode,
    ) -> Result<StatementIter> {
        let guard = self.inner.data.read()?;
        Ok(StatementIter::new(guard, pattern, mode, explicit_only))
    }

    /// Committed statements matching `pattern`.
    pub fn statements(&self, pattern: &TermPattern) -> Result<StatementIter> {
        self.query(pattern, false, ReadMode::Committed)
    }

    /// Number of statements matching `pattern` as seen in `mode`.
    pub fn count(&self, pattern: &TermPattern, mode: ReadMode) -> Result<usize> {
        Ok(self.inner.data.read()?.count(pattern, mode, false))
    }

    /// Number of committed statements.
    pub fn size(&self) -> Result<usize> {
        self.count(&TermPattern::any(), ReadMode::Committed)
    }

    /// Distinct named contexts of committed statements.
    pub fn contexts(&self) -> Result<Vec<Term>> {
        let data = self.inner.data.read()?;
        let mut contexts: Vec<Term> = data
            .statements
            .iter()
            .filter(|(_, st)| st.is_visible(ReadMode::Committed, false))
            .filter_map(|(_, st)| st.key.context)
            .filter_map(|id| data.terms.term(id).cloned())
            .collect();
        contexts.sort();
        contexts.dedup();
        Ok(contexts)
    }

    /// Number of registered terms.
    pub fn term_count(&self) -> Result<usize> {
        Ok(self.inner.data.read()?.terms.len())
    }

    /// Namespace bound to `prefix`.
    pub fn get_namespace(&self, prefix: &str) -> Result<Option<String>> {
        Ok(self
            .inner
            .data
            .read()?
            .namespaces
            .get_namespace(prefix)
            .map(str::to_string))
    }

    /// All namespace bindings.
    pub fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.inner.data.read()?.namespaces.namespaces())
    }

    /// Current lock state.
    pub fn lock_snapshot(&self) -> LockSnapshot {
        self.inner.data.snapshot(&self.inner.txn_lock)
    }

    /// Writes pending committed changes to the snapshot file now.
    pub fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    /// Stops the sync thread and writes pending changes.
    pub fn shutdown(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        self.inner.sync()?;
        debug!("memory.shutdown");
        Ok(())
    }

    /// Syncs or schedules a sync after a transaction ends.
    ///
    /// The transaction is already applied, so a failed immediate sync is
    /// logged and the store stays dirty for the next sync or shutdown.
    fn after_transaction(&self) {
        if !self.inner.dirty.load(Ordering::Acquire) {
            return;
        }
        match self.inner.options.sync_delay {
            SyncDelay::Immediate => {
                if let Err(err) = self.inner.sync() {
                    warn!(error = %err, "memory.sync.failed");
                }
            }
            SyncDelay::After(_) => {
                if let Some(scheduler) = &self.scheduler {
                    scheduler.schedule();
                }
            }
            SyncDelay::OnShutdown => {}
        }
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "memory.shutdown.sync_failed");
        }
    }
}

fn prepare_snapshot_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::File::create(path)?;
    debug!(path = %path.display(), "memory.snapshot.create");
    Ok(())
}

/// An open memory-engine transaction.
///
/// Changes are applied to the shared table immediately and tagged; they
/// are visible only to [`ReadMode::Transaction`] readers until commit.
/// Dropping the transaction rolls back.
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    _guard: TxnGuard,
    finished: bool,
}

impl MemoryTransaction<'_> {
    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(QuadStoreError::Invalid("transaction already finished"));
        }
        Ok(())
    }

    /// Adds a statement. Returns true if it was not already present with
    /// the same or stronger explicitness.
    pub fn add(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        context: Option<&Term>,
        explicit: bool,
    ) -> Result<bool> {
        self.ensure_open()?;
        if !subject.is_resource() {
            return Err(QuadStoreError::Invalid("subject must be a URI or blank node"));
        }
        if !predicate.is_uri() {
            return Err(QuadStoreError::Invalid("predicate must be a URI"));
        }
        if context.is_some_and(|c| !c.is_resource()) {
            return Err(QuadStoreError::Invalid("context must be a URI or blank node"));
        }
        let mut data = self.store.inner.data.write()?;
        let key = data.key(subject, predicate, object, context)?;
        data.add(key, explicit)
    }

    /// Removes statements matching `pattern` whose explicitness equals
    /// `explicit`. Returns how many disappeared from the transaction view.
    pub fn remove(&mut self, pattern: &TermPattern, explicit: bool) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.store.inner.data.write()?.remove(pattern, explicit))
    }

    /// Removes every explicit statement in `context`; `None` is the
    /// default graph.
    pub fn clear_context(&mut self, context: Option<&Term>) -> Result<usize> {
        self.remove(&TermPattern::any().context(context.cloned()), true)
    }

    /// Removes every explicit statement.
    pub fn clear_all(&mut self) -> Result<usize> {
        self.remove(&TermPattern::any(), true)
    }

    /// Removes every inferred statement.
    pub fn clear_inferred(&mut self) -> Result<usize> {
        self.remove(&TermPattern::any(), false)
    }

    /// Binds a namespace prefix.
    pub fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.store
            .inner
            .data
            .write()?
            .namespaces
            .set_namespace(prefix, name);
        self.store.inner.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Unbinds a namespace prefix.
    pub fn remove_namespace(&mut self, prefix: &str) -> Result<()> {
        self.ensure_open()?;
        self.store
            .inner
            .data
            .write()?
            .namespaces
            .remove_namespace(prefix);
        self.store.inner.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Statements matching `pattern` including this transaction's changes.
    ///
    /// Close the iterator before the next mutation; mutations wait for the
    /// data write lock.
    pub fn query(&self, pattern: &TermPattern, explicit_only: bool) -> Result<StatementIter> {
        self.store.query(pattern, explicit_only, ReadMode::Transaction)
    }

    /// Makes every change visible to committed readers.
    pub fn commit(mut self) -> Result<CommitReport> {
        self.ensure_open()?;
        let inner = &self.store.inner;
        let report = {
            let mut data = inner.data.write()?;
            self.finished = true;
            let report = data.commit();
            let released = data.terms.collect_garbage();
            debug!(
                added = report.added,
                removed = report.removed,
                released_terms = released,
                "memory.commit"
            );
            report
        };
        if report.added > 0 || report.removed > 0 {
            inner.dirty.store(true, Ordering::Release);
        }
        self.store.after_transaction();
        Ok(report)
    }

    /// Discards every change.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_open()?;
        self.finished = true;
        self.undo()?;
        self.store.after_transaction();
        Ok(())
    }

    fn undo(&self) -> Result<()> {
        let mut data = self.store.inner.data.write()?;
        let reverted = data.rollback();
        let released = data.terms.collect_garbage();
        debug!(reverted, released_terms = released, "memory.rollback");
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.undo() {
            Ok(()) => self.store.after_transaction(),
            Err(err) => warn!(error = %err, "memory.rollback.failed"),
        }
    }
}
