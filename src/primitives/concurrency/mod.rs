#![forbid(unsafe_code)]
//! Lock managers shared by both engines.
//!
//! [`TxnLock`] admits one logical transaction at a time. [`DataLock`] guards
//! the index or statement-table structures: queries hold a read guard for the
//! lifetime of their iterator and commits take the write guard while they
//! apply pending changes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Condvar, Mutex, RawRwLock, RwLock};
use tracing::trace;

use crate::types::{QuadStoreError, Result};

/// Exclusive, store-wide transaction lock.
#[derive(Clone)]
pub struct TxnLock {
    inner: Arc<TxnInner>,
}

struct TxnInner {
    state: Mutex<TxnState>,
    released: Condvar,
}

#[derive(Default, Debug)]
struct TxnState {
    held: bool,
    waiters: u32,
    interrupt_epoch: u64,
}

/// Guard representing the held transaction lock. Dropping it releases the
/// lock and wakes one waiter.
pub struct TxnGuard {
    inner: Arc<TxnInner>,
}

impl Drop for TxnGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.held = false;
        drop(state);
        self.inner.released.notify_one();
        trace!("lock.txn.release");
    }
}

impl std::fmt::Debug for TxnGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnGuard").finish_non_exhaustive()
    }
}

impl Default for TxnLock {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnLock {
    /// Creates an unheld lock.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TxnInner {
                state: Mutex::new(TxnState::default()),
                released: Condvar::new(),
            }),
        }
    }

    /// Blocks until the lock is free.
    ///
    /// With a `timeout`, gives up with [`QuadStoreError::LockTimeout`] once it
    /// elapses. A call to [`TxnLock::interrupt_waiters`] made while this call
    /// is blocked makes it return [`QuadStoreError::Interrupted`].
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<TxnGuard> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        let epoch = state.interrupt_epoch;
        state.waiters += 1;
        let outcome = loop {
            if state.interrupt_epoch != epoch {
                break Err(QuadStoreError::Interrupted);
            }
            if !state.held {
                state.held = true;
                break Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .released
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && state.held
                        && state.interrupt_epoch == epoch
                    {
                        break Err(QuadStoreError::LockTimeout("transaction"));
                    }
                }
                None => self.inner.released.wait(&mut state),
            }
        };
        state.waiters -= 1;
        drop(state);
        outcome?;
        trace!("lock.txn.acquire");
        Ok(TxnGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Acquires the lock only if it is currently free.
    pub fn try_acquire(&self) -> Option<TxnGuard> {
        let mut state = self.inner.state.lock();
        if state.held {
            return None;
        }
        state.held = true;
        Some(TxnGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Fails every acquisition currently blocked on this lock with
    /// [`QuadStoreError::Interrupted`]. Later acquisitions are unaffected.
    pub fn interrupt_waiters(&self) {
        let mut state = self.inner.state.lock();
        state.interrupt_epoch = state.interrupt_epoch.wrapping_add(1);
        drop(state);
        self.inner.released.notify_all();
    }

    /// Returns true while some transaction holds the lock.
    pub fn is_held(&self) -> bool {
        self.inner.state.lock().held
    }

    /// Number of threads currently blocked in [`TxnLock::acquire`].
    pub fn waiters(&self) -> u32 {
        self.inner.state.lock().waiters
    }
}

/// Multi-reader, single-writer lock around the shared data structures.
///
/// Guards own a reference to the lock so they can be stored inside result
/// iterators without borrowing the store.
pub struct DataLock<T> {
    data: Arc<RwLock<T>>,
    counters: Arc<LockCounters>,
    timeout: Option<Duration>,
}

impl<T> Clone for DataLock<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            counters: Arc::clone(&self.counters),
            timeout: self.timeout,
        }
    }
}

#[derive(Default)]
struct LockCounters {
    readers: AtomicU32,
    writer: AtomicBool,
}

/// Shared access to the guarded data.
pub struct DataReadGuard<T> {
    guard: ArcRwLockReadGuard<RawRwLock, T>,
    counters: Arc<LockCounters>,
}

impl<T> std::ops::Deref for DataReadGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for DataReadGuard<T> {
    fn drop(&mut self) {
        self.counters.readers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exclusive access to the guarded data.
pub struct DataWriteGuard<T> {
    guard: ArcRwLockWriteGuard<RawRwLock, T>,
    counters: Arc<LockCounters>,
}

impl<T> std::ops::Deref for DataWriteGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for DataWriteGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for DataWriteGuard<T> {
    fn drop(&mut self) {
        self.counters.writer.store(false, Ordering::Release);
    }
}

/// Snapshot of lock state for observability.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Number of live read guards.
    pub readers: u32,
    /// Whether the data write guard is held.
    pub writer: bool,
    /// Whether a transaction holds the transaction lock.
    pub transaction: bool,
}

impl<T> DataLock<T> {
    /// Wraps `value`. Acquisitions wait at most `timeout` when one is given.
    pub fn new(value: T, timeout: Option<Duration>) -> Self {
        Self {
            data: Arc::new(RwLock::new(value)),
            counters: Arc::new(LockCounters::default()),
            timeout,
        }
    }

    /// Takes a read guard, waiting for any active writer.
    pub fn read(&self) -> Result<DataReadGuard<T>> {
        let guard = match self.timeout {
            Some(timeout) => RwLock::try_read_arc_for(&self.data, timeout)
                .ok_or(QuadStoreError::LockTimeout("data read"))?,
            None => RwLock::read_arc(&self.data),
        };
        self.counters.readers.fetch_add(1, Ordering::AcqRel);
        Ok(DataReadGuard {
            guard,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Takes the write guard, waiting until every reader has finished.
    pub fn write(&self) -> Result<DataWriteGuard<T>> {
        let guard = match self.timeout {
            Some(timeout) => RwLock::try_write_arc_for(&self.data, timeout)
                .ok_or(QuadStoreError::LockTimeout("data write"))?,
            None => RwLock::write_arc(&self.data),
        };
        self.counters.writer.store(true, Ordering::Release);
        trace!(readers = self.readers(), "lock.data.write");
        Ok(DataWriteGuard {
            guard,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Number of live read guards.
    pub fn readers(&self) -> u32 {
        self.counters.readers.load(Ordering::Acquire)
    }

    /// Combines the data lock state with the state of `txn`.
    pub fn snapshot(&self, txn: &TxnLock) -> LockSnapshot {
        LockSnapshot {
            readers: self.readers(),
            writer: self.counters.writer.load(Ordering::Acquire),
            transaction: txn.is_held(),
        }
    }
}

impl<T> std::fmt::Debug for DataLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLock")
            .field("readers", &self.readers())
            .field("writer", &self.counters.writer.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn txn_lock_blocks_until_release() -> Result<()> {
        let lock = TxnLock::new();
        let guard = lock.acquire(None)?;
        let acquired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&acquired);
        let lock_clone = lock.clone();
        let handle = thread::spawn(move || {
            let _guard = lock_clone.acquire(None).expect("second acquire");
            flag.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst), "second txn must wait");
        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(!lock.is_held());
        Ok(())
    }

    #[test]
    fn txn_lock_times_out() -> Result<()> {
        let lock = TxnLock::new();
        let _guard = lock.acquire(None)?;
        let err = lock.acquire(Some(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(err, QuadStoreError::LockTimeout("transaction")));
        assert!(lock.try_acquire().is_none());
        Ok(())
    }

    #[test]
    fn interrupt_fails_blocked_waiter() -> Result<()> {
        let lock = TxnLock::new();
        let guard = lock.acquire(None)?;
        let lock_clone = lock.clone();
        let handle = thread::spawn(move || lock_clone.acquire(None).map(|_| ()));
        while lock.waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        lock.interrupt_waiters();
        let outcome = handle.join().unwrap();
        assert!(matches!(outcome, Err(QuadStoreError::Interrupted)));
        drop(guard);
        let _again = lock.acquire(Some(Duration::from_millis(100)))?;
        Ok(())
    }

    #[test]
    fn readers_stack_and_writer_waits() -> Result<()> {
        let lock = DataLock::new(0u32, None);
        let txn = TxnLock::new();
        let a = lock.read()?;
        let b = lock.read()?;
        assert_eq!(lock.snapshot(&txn).readers, 2);

        let writer_lock = lock.clone();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let handle = thread::spawn(move || {
            let mut guard = writer_lock.write().expect("write guard");
            *guard += 1;
            flag.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "writer must wait for readers");
        drop(a);
        drop(b);
        handle.join().unwrap();
        assert_eq!(*lock.read()?, 1);
        let snapshot = lock.snapshot(&txn);
        assert_eq!(snapshot.readers, 0);
        assert!(!snapshot.writer);
        Ok(())
    }

    #[test]
    fn write_times_out_behind_reader() -> Result<()> {
        let lock = DataLock::new((), Some(Duration::from_millis(20)));
        let _reader = lock.read()?;
        assert!(matches!(
            lock.write(),
            Err(QuadStoreError::LockTimeout("data write"))
        ));
        Ok(())
    }
}
