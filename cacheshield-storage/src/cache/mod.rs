//! Cache client and its read strategies.
//!
//! Callers choose per read how the backing source is protected, via
//! [`ReadStrategy`] or by calling a strategy method directly:
//!
//! - pass-through caches "not found" so missing keys stop reaching the source;
//! - mutex lets one caller rebuild a missing hot key while the rest wait;
//! - logical expiration always answers from the cache and refreshes
//!   expired entries on the rebuild pool.
//!
//! # Example
//!
//! ```ignore
//! let shop = client.get(ReadStrategy::Mutex, &shops, 42, Arc::new(db_loader)).await?;
//! ```

pub mod client;
pub mod stats;
pub mod strategy;

pub use client::CacheClient;
pub use stats::CacheStats;
pub use strategy::ReadStrategy;
