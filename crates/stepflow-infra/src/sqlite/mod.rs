//! SQLite storage layer.
//!
//! Repository implementation backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod pool;
pub mod workflow;
