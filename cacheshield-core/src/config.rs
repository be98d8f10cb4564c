//! Configuration types
//!
//! Per-family TTL policy plus the client-wide knobs for the mutex retry
//! loop and the rebuild pool. Client-wide settings load from `CACHESHIELD_*`
//! environment variables with defaults from [`crate::constants`].

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TTLs applied to one cache family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// TTL for real values written by the pass-through and mutex strategies.
    /// Also the logical freshness window for the logical-expiration strategy.
    pub value_ttl: Duration,
    /// TTL for null markers. Bounds how long a confirmed absence is remembered.
    pub null_ttl: Duration,
    /// Safety TTL for rebuild locks. Should exceed the expected loader latency.
    ///
    /// Also caps how long a background rebuild may run.
    pub lock_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            value_ttl: Duration::from_secs(DEFAULT_VALUE_TTL_SECS),
            null_ttl: Duration::from_secs(DEFAULT_NULL_TTL_SECS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
        }
    }
}

impl TtlPolicy {
    pub fn new(value_ttl: Duration, null_ttl: Duration, lock_ttl: Duration) -> Self {
        Self {
            value_ttl,
            null_ttl,
            lock_ttl,
        }
    }

    /// Set the value TTL.
    pub fn with_value_ttl(mut self, ttl: Duration) -> Self {
        self.value_ttl = ttl;
        self
    }

    /// Set the null marker TTL.
    pub fn with_null_ttl(mut self, ttl: Duration) -> Self {
        self.null_ttl = ttl;
        self
    }

    /// Set the lock TTL.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("ttl.value_ttl", self.value_ttl)?;
        require_non_zero("ttl.null_ttl", self.null_ttl)?;
        require_non_zero("ttl.lock_ttl", self.lock_ttl)?;
        if self.null_ttl > self.value_ttl {
            return Err(ConfigError::InvalidValue {
                field: "ttl.null_ttl".to_string(),
                value: format!("{:?}", self.null_ttl),
                reason: format!("must not exceed value_ttl ({:?})", self.value_ttl),
            });
        }
        Ok(())
    }
}

/// Retry behaviour of the mutex-protected strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexRetryConfig {
    /// Sleep between lock acquisition attempts.
    pub backoff: Duration,
    /// Upper bound on the total time spent waiting for the lock.
    pub max_wait: Duration,
    /// Pause after a successful rebuild before returning to the caller.
    pub post_rebuild_delay: Duration,
}

impl Default for MutexRetryConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(DEFAULT_MUTEX_BACKOFF_MS),
            max_wait: Duration::from_millis(DEFAULT_MUTEX_MAX_WAIT_MS),
            post_rebuild_delay: Duration::from_millis(DEFAULT_POST_REBUILD_DELAY_MS),
        }
    }
}

impl MutexRetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("mutex_retry.backoff", self.backoff)?;
        if self.backoff > self.max_wait {
            return Err(ConfigError::InvalidValue {
                field: "mutex_retry.backoff".to_string(),
                value: format!("{:?}", self.backoff),
                reason: format!("must not exceed max_wait ({:?})", self.max_wait),
            });
        }
        Ok(())
    }
}

/// Sizing of the asynchronous rebuild pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildPoolConfig {
    /// Number of rebuilds that may run at the same time.
    pub workers: usize,
    /// Number of submitted rebuilds that may wait for a free worker.
    /// Submissions beyond this are rejected, never blocked on.
    pub queue_capacity: usize,
    /// Deadline for a single rebuild, loader call included.
    pub task_deadline: Duration,
    /// Unread failure reports kept before new ones are dropped.
    pub failure_buffer: usize,
}

impl Default for RebuildPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_REBUILD_WORKERS,
            queue_capacity: DEFAULT_REBUILD_QUEUE_CAPACITY,
            task_deadline: Duration::from_millis(DEFAULT_REBUILD_DEADLINE_MS),
            failure_buffer: DEFAULT_REBUILD_FAILURE_BUFFER,
        }
    }
}

impl RebuildPoolConfig {
    /// A single worker with a one-slot queue, for deterministic tests.
    pub fn single_worker() -> Self {
        Self {
            workers: 1,
            queue_capacity: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("rebuild_pool.workers", self.workers)?;
        require_positive("rebuild_pool.queue_capacity", self.queue_capacity)?;
        require_positive("rebuild_pool.failure_buffer", self.failure_buffer)?;
        require_non_zero("rebuild_pool.task_deadline", self.task_deadline)
    }
}

/// Client-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheShieldConfig {
    pub mutex_retry: MutexRetryConfig,
    pub rebuild_pool: RebuildPoolConfig,
}

impl CacheShieldConfig {
    /// Create CacheShieldConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHESHIELD_MUTEX_BACKOFF_MS`: Sleep between lock attempts (default: 50)
    /// - `CACHESHIELD_MUTEX_MAX_WAIT_MS`: Total lock wait budget (default: 5000)
    /// - `CACHESHIELD_POST_REBUILD_DELAY_MS`: Pause after a rebuild (default: 0)
    /// - `CACHESHIELD_REBUILD_WORKERS`: Concurrent rebuilds (default: 10)
    /// - `CACHESHIELD_REBUILD_QUEUE_CAPACITY`: Waiting rebuilds (default: 128)
    /// - `CACHESHIELD_REBUILD_DEADLINE_MS`: Per-rebuild deadline (default: 30000)
    /// - `CACHESHIELD_REBUILD_FAILURE_BUFFER`: Unread failure reports (default: 64)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Unset variables fall back to defaults. Set but unparsable variables
    /// are an error rather than silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            mutex_retry: MutexRetryConfig {
                backoff: millis(&lookup, "MUTEX_BACKOFF_MS", DEFAULT_MUTEX_BACKOFF_MS)?,
                max_wait: millis(&lookup, "MUTEX_MAX_WAIT_MS", DEFAULT_MUTEX_MAX_WAIT_MS)?,
                post_rebuild_delay: millis(
                    &lookup,
                    "POST_REBUILD_DELAY_MS",
                    DEFAULT_POST_REBUILD_DELAY_MS,
                )?,
            },
            rebuild_pool: RebuildPoolConfig {
                workers: parsed(&lookup, "REBUILD_WORKERS", DEFAULT_REBUILD_WORKERS)?,
                queue_capacity: parsed(
                    &lookup,
                    "REBUILD_QUEUE_CAPACITY",
                    DEFAULT_REBUILD_QUEUE_CAPACITY,
                )?,
                task_deadline: millis(&lookup, "REBUILD_DEADLINE_MS", DEFAULT_REBUILD_DEADLINE_MS)?,
                failure_buffer: parsed(
                    &lookup,
                    "REBUILD_FAILURE_BUFFER",
                    DEFAULT_REBUILD_FAILURE_BUFFER,
                )?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration for development/testing with short timings.
    pub fn development() -> Self {
        Self {
            mutex_retry: MutexRetryConfig {
                backoff: Duration::from_millis(5),
                max_wait: Duration::from_secs(2),
                post_rebuild_delay: Duration::ZERO,
            },
            rebuild_pool: RebuildPoolConfig {
                workers: 2,
                queue_capacity: 16,
                task_deadline: Duration::from_secs(2),
                failure_buffer: 16,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mutex_retry.validate()?;
        self.rebuild_pool.validate()
    }
}

fn require_non_zero(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn require_positive(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn parsed<F, T>(lookup: &F, suffix: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let name = format!("{ENV_PREFIX}{suffix}");
    match lookup(&name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: name,
            value: raw.clone(),
            reason: "not a valid number".to_string(),
        }),
    }
}

fn millis<F>(lookup: &F, suffix: &str, default_ms: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parsed(lookup, suffix, default_ms).map(Duration::from_millis)
}
