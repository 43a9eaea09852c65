//! Versioned response caching for offline support.
//!
//! This module provides:
//! - Named cache generations mapping request identities to response snapshots
//! - SQLite-backed and in-memory storage behind one trait
//! - Cache-first and network-first strategies with fallback assets

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
