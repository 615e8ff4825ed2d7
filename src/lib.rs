//! Transactional RDF quad store.
//!
//! Two engines share one data model: [`storage::NativeStore`] keeps quads
//! in sorted index permutations on disk, [`memory::MemoryStore`] keeps them
//! in memory with per-statement transaction status.

#![warn(missing_docs)]

pub mod memory;
pub mod model;
pub mod primitives;
pub mod storage;
pub mod types;

pub use memory::{MemoryStore, MemoryStoreOptions, MemoryTransaction, ReadMode, Statement, TermPattern};
pub use model::{Namespace, Term};
pub use storage::{CommitReport, NativeStore, NativeStoreOptions, NativeTransaction, QuadIter};
pub use types::{Field, Quad, QuadPattern, QuadRecord, QuadStoreError, Result, ValueId};
