//! Partitioned response cache for offline support.
//!
//! This module provides:
//! - Named partitions holding response snapshots keyed by request
//! - SQLite and in-memory storage backends
//! - Network-first and cache-first strategies with background writes

mod layer;
mod partition;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use partition::PartitionNames;
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource, CacheStorage};
