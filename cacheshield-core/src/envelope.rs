//! Envelope codec for cached entries.
//!
//! Every value the cache layer writes goes through this module. Two shapes
//! exist:
//!
//! - [`CacheSlot`] for the pass-through and mutex strategies. A confirmed
//!   absence is stored as [`CacheSlot::Null`], an explicit tag that can never
//!   be confused with a real value (an empty string is still a value).
//! - [`LogicalEnvelope`] for the logical-expiration strategy. It wraps a slot
//!   with the wall-clock instant after which the entry counts as stale.
//!
//! Both are serialized as JSON. Decoding is typed and happens once; a
//! malformed entry is reported as [`CodecError::Decode`], never as a miss.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CodecError;
use crate::Timestamp;

/// A cached entry: either a confirmed absence or a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum CacheSlot<V> {
    /// The source confirmed there is nothing under this identifier.
    Null,
    /// A real value loaded from the source.
    Value(V),
}

impl<V> CacheSlot<V> {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            Self::Null => None,
            Self::Value(value) => Some(value),
        }
    }

    pub fn as_ref(&self) -> CacheSlot<&V> {
        match self {
            Self::Null => CacheSlot::Null,
            Self::Value(value) => CacheSlot::Value(value),
        }
    }
}

impl<V> From<Option<V>> for CacheSlot<V> {
    fn from(value: Option<V>) -> Self {
        match value {
            None => Self::Null,
            Some(value) => Self::Value(value),
        }
    }
}

/// A slot plus the instant it stops being fresh.
///
/// The store entry holding an envelope has no store-level TTL; only the
/// embedded timestamp decides staleness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalEnvelope<V> {
    pub slot: CacheSlot<V>,
    pub logical_expire_at: Timestamp,
}

impl<V> LogicalEnvelope<V> {
    pub fn new(slot: CacheSlot<V>, logical_expire_at: Timestamp) -> Self {
        Self {
            slot,
            logical_expire_at,
        }
    }

    /// Wrap a slot that stays fresh for `ttl` from now.
    pub fn fresh_for(slot: CacheSlot<V>, ttl: Duration) -> Self {
        Self::new(slot, expire_at(Utc::now(), ttl))
    }

    /// Stale once `now` reaches the logical expiry.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.logical_expire_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn into_value(self) -> Option<V> {
        self.slot.into_option()
    }
}

/// `now + ttl`, saturating at the largest representable timestamp.
pub fn expire_at(now: Timestamp, ttl: Duration) -> Timestamp {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn encode_slot<V: Serialize>(key: &str, slot: &CacheSlot<V>) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(slot).map_err(|e| CodecError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_slot<V: DeserializeOwned>(
    key: &str,
    bytes: &[u8],
) -> Result<CacheSlot<V>, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn encode_logical<V: Serialize>(
    key: &str,
    envelope: &LogicalEnvelope<V>,
) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(|e| CodecError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_logical<V: DeserializeOwned>(
    key: &str,
    bytes: &[u8],
) -> Result<LogicalEnvelope<V>, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
