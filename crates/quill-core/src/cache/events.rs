use serde::{Deserialize, Serialize};

/// Why an entry left the cache. Passed to the dispose callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposeReason {
    Deleted,
    /// Pushed out by the size limit.
    Evicted,
    Expired,
    /// Overwritten by a `set` of the same key.
    Replaced,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<K> {
    Hit { key: K },
    Miss { key: K },
    Set { key: K, size: usize },
    Delete { key: K },
    /// Removal by the cache itself: size pressure, expiry, or replacement.
    Evict { key: K, reason: DisposeReason },
    Clear { removed: usize },
    /// The value alone is larger than the cache; nothing was stored.
    Reject { key: K, size: usize },
}

impl<K> CacheEvent<K> {
    pub fn key(&self) -> Option<&K> {
        match self {
            CacheEvent::Hit { key }
            | CacheEvent::Miss { key }
            | CacheEvent::Set { key, .. }
            | CacheEvent::Delete { key }
            | CacheEvent::Evict { key, .. }
            | CacheEvent::Reject { key, .. } => Some(key),
            CacheEvent::Clear { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::Set { .. } => "set",
            CacheEvent::Delete { .. } => "delete",
            CacheEvent::Evict { .. } => "evict",
            CacheEvent::Clear { .. } => "clear",
            CacheEvent::Reject { .. } => "reject",
        }
    }
}
