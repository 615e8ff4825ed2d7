use std::path::PathBuf;
use std::time::Duration;

/// When committed changes are written to the snapshot file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncDelay {
    /// Write the snapshot as part of every commit.
    #[default]
    Immediate,
    /// Write once the store has been idle for the given interval after a
    /// commit. Bursts of commits coalesce into one write.
    After(Duration),
    /// Only write on shutdown.
    OnShutdown,
}

impl SyncDelay {
    /// Interprets a millisecond setting: zero is immediate, positive values
    /// delay, negative values defer until shutdown.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => SyncDelay::Immediate,
            m if m > 0 => SyncDelay::After(Duration::from_millis(m.unsigned_abs())),
            _ => SyncDelay::OnShutdown,
        }
    }
}

/// Configuration options supplied when opening a [`super::MemoryStore`].
#[derive(Clone, Debug, Default)]
pub struct MemoryStoreOptions {
    /// Snapshot file to load from and persist to. `None` keeps the store
    /// purely in memory.
    pub snapshot: Option<PathBuf>,
    /// Snapshot write schedule.
    pub sync_delay: SyncDelay,
    /// Whether snapshot writes are fsynced.
    pub force_sync: bool,
    /// Upper bound on lock waits; `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl MemoryStoreOptions {
    /// Options for a volatile store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists the store to `path`.
    pub fn snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot = Some(path.into());
        self
    }

    /// Sets the snapshot write schedule.
    pub fn sync_delay(mut self, delay: SyncDelay) -> Self {
        self.sync_delay = delay;
        self
    }

    /// Enables or disables fsync of snapshot writes.
    pub fn force_sync(mut self, enabled: bool) -> Self {
        self.force_sync = enabled;
        self
    }

    /// Bounds lock waits.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}
