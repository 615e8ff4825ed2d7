//! Low-level primitives shared by both storage engines.

/// Byte-level encoding helpers.
pub mod bytes;

/// Transaction and data lock managers.
pub mod concurrency;

/// Whole-file persistence helpers.
pub mod io;
