//! Key-value store adapters.

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod traits;

pub use memory::{EntryInfo, InMemoryKvStore};
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisKvStore;
pub use traits::KvStore;
