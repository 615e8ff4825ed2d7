use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::index::DEFAULT_INDEX_SPEC;
use super::values::ValueStore;

/// Configuration options supplied when opening a [`super::NativeStore`].
#[derive(Clone)]
pub struct NativeStoreOptions {
    /// Comma- or whitespace-separated index permutations, e.g. `"spoc,posc"`.
    pub index_spec: String,
    /// Whether index, dictionary and log files are fsynced on commit.
    pub force_sync: bool,
    /// Upper bound on lock waits; `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
    /// Value store to intern terms with. Defaults to a dictionary persisted
    /// in the store directory.
    pub value_store: Option<Arc<dyn ValueStore>>,
    /// Number of index entries examined per iterator refill.
    pub scan_batch: usize,
}

impl NativeStoreOptions {
    /// Creates options with the default index set.
    pub fn new() -> Self {
        Self {
            index_spec: DEFAULT_INDEX_SPEC.to_string(),
            force_sync: false,
            lock_timeout: None,
            value_store: None,
            scan_batch: 256,
        }
    }

    /// Sets the index permutations.
    pub fn index_spec(mut self, spec: impl Into<String>) -> Self {
        self.index_spec = spec.into();
        self
    }

    /// Enables or disables fsync on commit.
    pub fn force_sync(mut self, enabled: bool) -> Self {
        self.force_sync = enabled;
        self
    }

    /// Bounds lock waits.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Injects the value store.
    pub fn value_store(mut self, store: Arc<dyn ValueStore>) -> Self {
        self.value_store = Some(store);
        self
    }

    /// Sets the iterator refill size. Zero is treated as one.
    pub fn scan_batch(mut self, entries: usize) -> Self {
        self.scan_batch = entries.max(1);
        self
    }
}

impl Default for NativeStoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NativeStoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeStoreOptions")
            .field("index_spec", &self.index_spec)
            .field("force_sync", &self.force_sync)
            .field("lock_timeout", &self.lock_timeout)
            .field("value_store", &self.value_store.is_some())
            .field("scan_batch", &self.scan_batch)
            .finish()
    }
}
