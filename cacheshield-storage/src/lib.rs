//! cacheshield Storage - Cache Client, Locks and Rebuild Pool
//!
//! Runs the read strategies defined over `cacheshield-core` types against a
//! shared key-value store. The store is reached only through [`KvStore`];
//! an in-memory adapter is always available and a Redis adapter is behind
//! the `redis-backend` feature.

pub mod cache;
pub mod lock;
pub mod rebuild;
pub mod store;

pub use cache::{CacheClient, CacheStats, ReadStrategy};
pub use lock::{HeldLock, LockManager};
pub use rebuild::{
    RebuildFailure, RebuildFailureReason, RebuildScheduler, RebuildStats, RebuildTask, Submission,
};
pub use store::{EntryInfo, InMemoryKvStore, KvStore};
#[cfg(feature = "redis-backend")]
pub use store::RedisKvStore;
