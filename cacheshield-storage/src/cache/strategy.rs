//! Read strategy selection.
//!
//! Callers pick how a read protects the backing source. The choice is
//! explicit per call rather than fixed per client, so one client can serve
//! cold lookups, hot keys and pre-warmed entries side by side.

/// How a cache read behaves on a miss or an expired entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadStrategy {
    /// Load on miss and cache "not found" as a null marker.
    ///
    /// No locking: concurrent misses may each call the loader. Suits keys
    /// that are not hot.
    #[default]
    PassThrough,

    /// Load on miss under a per-key lock; other callers wait and retry.
    ///
    /// At most one loader call per key is in flight. Callers may fail with
    /// a lock timeout.
    Mutex,

    /// Serve the cached value even when logically expired and rebuild in
    /// the background.
    ///
    /// Never loads on a structural miss: the entry must be pre-warmed.
    LogicalExpire,
}

impl ReadStrategy {
    /// Whether the call can wait on another caller's rebuild.
    pub fn may_block(&self) -> bool {
        matches!(self, Self::Mutex)
    }

    /// Whether a miss triggers a synchronous loader call.
    pub fn loads_on_miss(&self) -> bool {
        !matches!(self, Self::LogicalExpire)
    }

    /// Whether entries are written with a store-level TTL.
    pub fn uses_store_ttl(&self) -> bool {
        !matches!(self, Self::LogicalExpire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_pass_through() {
        assert_eq!(ReadStrategy::default(), ReadStrategy::PassThrough);
    }

    #[test]
    fn test_strategy_traits() {
        assert!(ReadStrategy::Mutex.may_block());
        assert!(!ReadStrategy::PassThrough.may_block());
        assert!(!ReadStrategy::LogicalExpire.may_block());

        assert!(ReadStrategy::PassThrough.loads_on_miss());
        assert!(ReadStrategy::Mutex.loads_on_miss());
        assert!(!ReadStrategy::LogicalExpire.loads_on_miss());

        assert!(!ReadStrategy::LogicalExpire.uses_store_ttl());
    }
}
