//! Cache Record Module
//!
//! Defines the value persisted per key: payload plus expiry and access times.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// TTL for negative results ("looked up, found nothing").
pub const SHORT_TTL: Duration = Duration::days(1);

/// TTL for records carrying a payload.
pub const LONG_TTL: Duration = Duration::days(90);

// == Cache Record ==
/// A single cached value with its expiry metadata.
///
/// `data == None` is a remembered negative result, not a missing record.
/// A payload type that itself serializes to `null` is indistinguishable from
/// a negative result once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    /// Cached payload, None = known absent
    pub data: Option<T>,
    /// Absolute expiry instant
    #[serde(rename = "expirationDateUtc")]
    pub expires_at: DateTime<Utc>,
    /// Most recent hit (or creation). Records written before access
    /// tracking existed load as the epoch.
    #[serde(rename = "lastAccessedDateUtc", default = "epoch")]
    pub last_accessed_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl<T> CacheRecord<T> {
    // == Constructor ==
    /// Creates a record written at `now`, choosing the TTL from the payload.
    pub fn new(data: Option<T>, now: DateTime<Utc>) -> Self {
        let ttl = if data.is_some() { LONG_TTL } else { SHORT_TTL };

        Self {
            data,
            expires_at: now + ttl,
            last_accessed_at: now,
        }
    }

    // == Is Expired ==
    /// An entry is expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when this record remembers a negative lookup.
    pub fn is_negative(&self) -> bool {
        self.data.is_none()
    }

    /// Marks the record as accessed at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
    }

    /// Remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        let remaining = self.expires_at - Utc::now();
        if remaining > Duration::zero() {
            remaining
        } else {
            Duration::zero()
        }
    }
}

impl<T: Serialize> CacheRecord<T> {
    /// Serializes the record to the string form kept in the backing store.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<T: DeserializeOwned> CacheRecord<T> {
    /// Parses a stored value, failing with `MalformedRecord` if it is not a
    /// cache record of this payload type.
    pub fn decode(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CacheError::MalformedRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
