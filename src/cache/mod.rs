//! Versioned cache tiers over a pluggable storage backend.
//!
//! This module provides:
//! - A `CacheStorage` trait with SQLite, in-memory and no-op backends
//! - A tier registry that names the four tiers after the running version
//!   and sweeps caches left behind by older versions
//! - The entry-count bound applied to the image tier

pub mod eviction;
mod memory;
mod storage;
mod tiers;

pub use memory::MemoryStorage;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use tiers::{CacheHandle, CacheTier, TierKind, TierRegistry};
