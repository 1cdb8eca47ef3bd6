// SPDX-License-Identifier: Apache-2.0

//! The optional per-handler object cache (§4.2), used by matchers to resolve
//! e.g. namespace label selectors without an extra out-of-band lookup.

use dashmap::DashMap;
use serde_json::Value;

/// A handler-owned cache of objects, keyed by an opaque string (typically a
/// name or a rendered [`warden_core::path::StoragePath`]).
pub trait Cache: Send + Sync {
    /// Looks up `key`. `None` means "absent"; callers must treat this as a
    /// cache-miss, not a fatal error.
    fn get(&self, key: &str) -> Option<Value>;
}

/// A simple concurrent in-memory cache, suitable for the reference target
/// handlers in this crate (e.g. namespace labels for selector matching).
#[derive(Default)]
pub struct InMemoryCache(DashMap<String, Value>);

impl InMemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value at `key`.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        let _ = self.0.insert(key.into(), value);
    }

    /// Removes `key`, if present.
    pub fn remove(&self, key: &str) {
        let _ = self.0.remove(key);
    }
}

impl Cache for InMemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.0.get(key).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_returns_none() {
        let cache = InMemoryCache::new();
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = InMemoryCache::new();
        cache.put("ns/team-a", serde_json::json!({"team": "a"}));
        assert_eq!(cache.get("ns/team-a"), Some(serde_json::json!({"team": "a"})));
    }

    #[test]
    fn remove_clears_entry() {
        let cache = InMemoryCache::new();
        cache.put("ns/team-a", serde_json::json!({}));
        cache.remove("ns/team-a");
        assert!(cache.get("ns/team-a").is_none());
    }
}
