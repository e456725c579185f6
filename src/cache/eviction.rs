//! Eviction Module
//!
//! Orders cache records for least-recently-used eviction.

use chrono::{DateTime, Utc};

// == Eviction Candidate ==
/// A stored record considered for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    /// Full namespaced key
    pub key: String,
    /// Last hit (or creation) time of the record
    pub last_accessed_at: DateTime<Utc>,
    /// Bytes freed by removing the record (key + serialized value)
    pub size_bytes: u64,
}

// == Eviction Plan ==
/// Candidates in eviction order.
///
/// - Front = least recently accessed
/// - Back = most recently accessed
///
/// Ties on access time are broken by key so the order is deterministic.
#[derive(Debug, Default)]
pub struct EvictionPlan {
    order: Vec<EvictionCandidate>,
}

impl EvictionPlan {
    pub fn new(mut candidates: Vec<EvictionCandidate>) -> Self {
        candidates.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        Self { order: candidates }
    }

    pub fn candidates(&self) -> &[EvictionCandidate] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sum of every candidate's size.
    pub fn total_bytes(&self) -> u64 {
        self.order.iter().map(|c| c.size_bytes).sum()
    }
}

impl IntoIterator for EvictionPlan {
    type Item = EvictionCandidate;
    type IntoIter = std::vec::IntoIter<EvictionCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.into_iter()
    }
}
