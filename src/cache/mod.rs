//! Page cache between the remote service and every read.
//!
//! This module provides:
//! - Per-page entries keyed by `(entity type, entity id, query kind, page token)`
//! - Freshness decided per call from the caller's max age
//! - At most one in-flight remote fetch per key
//! - Explicit invalidation and an expiry sweep

mod layer;
mod storage;
mod traits;

pub use layer::CacheStore;
pub use storage::SqliteStorage;
pub use traits::{CacheStorage, Fetched};
