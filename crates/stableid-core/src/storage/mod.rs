//! Registry persistence.
//!
//! This module provides:
//! - Atomic JSON file operations
//! - The `PersistenceSink` seam with file and in-memory implementations
//! - An exclusive lock enforcing one writing session at a time

mod atomic;
mod lock;
mod sink;

pub use atomic::{atomic_read_json, atomic_write_json, backup_path_for};
pub use lock::SessionLock;
pub use sink::{JsonFileSink, MemorySink, PersistenceSink, RegistryDocument, FORMAT_VERSION};
