//! cacheshield Core - Types for the Cache-Consistency Layer
//!
//! Pure data structures and contracts shared by every cacheshield crate:
//! the error taxonomy, configuration, key namespacing, the envelope codec
//! and the loader contract. No I/O lives here.

pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod key;
pub mod loader;

use chrono::{DateTime, Utc};

/// Wall-clock timestamp used for logical expiry.
pub type Timestamp = DateTime<Utc>;

pub use config::{CacheShieldConfig, MutexRetryConfig, RebuildPoolConfig, TtlPolicy};
pub use envelope::{
    decode_logical, decode_slot, encode_logical, encode_slot, expire_at, CacheSlot,
    LogicalEnvelope,
};
pub use error::{
    CacheShieldError, CacheShieldResult, CodecError, ConfigError, LoaderError, LockError,
    StoreError,
};
pub use key::{validate_families, CacheFamily, CacheKey, LockKey};
pub use loader::{loader_fn, FnLoader, Loader};
