//! Cache families and the keys they address.
//!
//! A [`CacheFamily`] owns a data prefix, a lock prefix and a TTL policy.
//! [`CacheKey`] and [`LockKey`] can only be built through a family, so a
//! read path can never address a key outside the namespace it was given.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::TtlPolicy;
use crate::error::ConfigError;

/// Store key of one cached item: `data_prefix + identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Store key whose presence means "rebuild in progress": `lock_prefix + identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LockKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Namespace and TTL policy shared by every entry of one kind.
///
/// # Example
///
/// ```
/// use cacheshield_core::{CacheFamily, TtlPolicy};
///
/// let shops = CacheFamily::new("shop", "cache:shop:", "lock:shop:", TtlPolicy::default());
/// assert_eq!(shops.data_key(&42).as_str(), "cache:shop:42");
/// assert_eq!(shops.lock_key(&42).as_str(), "lock:shop:42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheFamily {
    name: String,
    data_prefix: String,
    lock_prefix: String,
    ttl: TtlPolicy,
}

impl CacheFamily {
    pub fn new(
        name: impl Into<String>,
        data_prefix: impl Into<String>,
        lock_prefix: impl Into<String>,
        ttl: TtlPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            data_prefix: data_prefix.into(),
            lock_prefix: lock_prefix.into(),
            ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_prefix(&self) -> &str {
        &self.data_prefix
    }

    pub fn lock_prefix(&self) -> &str {
        &self.lock_prefix
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Replace the TTL policy.
    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn data_key<Id: fmt::Display + ?Sized>(&self, id: &Id) -> CacheKey {
        CacheKey(format!("{}{}", self.data_prefix, id))
    }

    pub fn lock_key<Id: fmt::Display + ?Sized>(&self, id: &Id) -> LockKey {
        LockKey(format!("{}{}", self.lock_prefix, id))
    }

    /// Check the family on its own: prefixes present and distinct, TTLs sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_prefix.is_empty() {
            return Err(ConfigError::MissingField {
                field: format!("{}.data_prefix", self.name),
            });
        }
        if self.lock_prefix.is_empty() {
            return Err(ConfigError::MissingField {
                field: format!("{}.lock_prefix", self.name),
            });
        }
        check_pair(&self.data_prefix, &self.lock_prefix)?;
        self.ttl.validate()
    }
}

/// Validate a set of families that share one store.
///
/// Two `(prefix, id)` pairs can only produce the same key when one prefix
/// is a prefix of the other (`"shop:"` + `"type:1"` == `"shop:type:"` + `"1"`),
/// so every data and lock prefix must be prefix-free against all others.
pub fn validate_families(families: &[CacheFamily]) -> Result<(), ConfigError> {
    for family in families {
        family.validate()?;
    }
    let prefixes: Vec<&str> = families
        .iter()
        .flat_map(|f| [f.data_prefix.as_str(), f.lock_prefix.as_str()])
        .collect();
    for (i, first) in prefixes.iter().enumerate() {
        for second in &prefixes[i + 1..] {
            check_pair(first, second)?;
        }
    }
    Ok(())
}

fn check_pair(first: &str, second: &str) -> Result<(), ConfigError> {
    if first.starts_with(second) || second.starts_with(first) {
        return Err(ConfigError::PrefixCollision {
            first: first.to_string(),
            second: second.to_string(),
        });
    }
    Ok(())
}
