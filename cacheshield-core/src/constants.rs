//! Constants for cacheshield
//!
//! Default timings and pool sizes. Every value here can be overridden
//! through the configuration types in [`crate::config`].

// ============================================================================
// TTL POLICY
// ============================================================================

/// Default TTL for cached values in seconds (30 minutes)
pub const DEFAULT_VALUE_TTL_SECS: u64 = 30 * 60;

/// Default TTL for null markers in seconds (2 minutes)
pub const DEFAULT_NULL_TTL_SECS: u64 = 2 * 60;

/// Default safety TTL for rebuild locks in seconds
pub const DEFAULT_LOCK_TTL_SECS: u64 = 10;

// ============================================================================
// MUTEX STRATEGY
// ============================================================================

/// Default sleep between lock acquisition attempts in milliseconds
pub const DEFAULT_MUTEX_BACKOFF_MS: u64 = 50;

/// Default upper bound on total lock wait in milliseconds
pub const DEFAULT_MUTEX_MAX_WAIT_MS: u64 = 5_000;

/// Default pause after a successful rebuild in milliseconds
pub const DEFAULT_POST_REBUILD_DELAY_MS: u64 = 0;

// ============================================================================
// REBUILD POOL
// ============================================================================

/// Default number of concurrent rebuild workers
pub const DEFAULT_REBUILD_WORKERS: usize = 10;

/// Default number of rebuild tasks that may wait for a worker
pub const DEFAULT_REBUILD_QUEUE_CAPACITY: usize = 128;

/// Default deadline for a single rebuild in milliseconds
pub const DEFAULT_REBUILD_DEADLINE_MS: u64 = 30_000;

/// Default number of unread failure reports kept before new ones are dropped
pub const DEFAULT_REBUILD_FAILURE_BUFFER: usize = 64;

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Prefix shared by every configuration environment variable
pub const ENV_PREFIX: &str = "CACHESHIELD_";
