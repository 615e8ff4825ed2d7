//! Disk engine.
//!
//! Quads are kept in several sorted index permutations, each persisted as
//! its own file. Writers record intent in a transaction log that commit
//! replays under the data write lock.

/// Index permutations and their on-disk files.
pub mod index;

mod namespaces;
mod native;
mod options;
mod properties;
mod record;
mod triples;
mod txn_log;
mod values;

/// Namespace bindings.
pub use namespaces::{NamespaceStore, NamespaceTable, NAMESPACES_FILE};

/// Store facade, transactions and query results.
pub use native::{CommitReport, NativeState, NativeStore, NativeTransaction, QuadIter};

/// Open options.
pub use options::NativeStoreOptions;

pub use properties::{TripleProperties, PROPERTIES_FILE, SCHEMA_VERSION};
pub use record::{RecordBytes, SearchBounds, EXPLICIT_FLAG, KEY_LEN, RECORD_LEN};
pub use triples::{QueryPlan, TripleStore};
pub use txn_log::{read_log, LogContents, LogRecord, TxnLogWriter, LOG_PREFIX, LOG_SUFFIX};

/// Term interning.
pub use values::{ValueDictionary, ValueStore, VALUES_FILE};
