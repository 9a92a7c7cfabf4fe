//! In-memory response cache with lazy TTL expiry.
//!
//! Entries are keyed by the literal request target (see [`CacheKey`]) and
//! hold the decoded upstream payload. An entry is valid while
//! `now - stored_at < ttl`; the lookup that finds an expired entry removes
//! it. There is no background sweep and no size bound.
//!
//! [`CacheStore`] is a cheap handle: clones share the same map, so the
//! application creates one at startup and hands clones to the routes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;

use crate::Request;

/// Default lifetime of a cached response.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Identifies a cached response: the request path plus its raw query string.
///
/// Keys are deliberately not canonicalized, so `?lat=1&lng=2` and
/// `?lng=2&lat=1` name different entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives the key for an inbound request from its target as received.
    pub fn from_request(request: &Request) -> Self {
        Self(request.target())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

/// Shared TTL cache of upstream payloads.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_proxy::cache::{CacheKey, CacheStore};
/// use serde_json::json;
///
/// let cache = CacheStore::new(Duration::from_secs(60));
/// let key = CacheKey::new("/api/menu?lat=1");
///
/// assert_eq!(cache.get(&key), None);
/// cache.set(key.clone(), json!({"x": 1}));
/// assert_eq!(cache.get(&key), Some(json!({"x": 1})));
/// ```
#[derive(Debug, Clone)]
pub struct CacheStore {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached payload for `key` if it is still fresh.
    ///
    /// An expired entry is removed before returning `None`.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if now.duration_since(entry.stored_at) < self.ttl {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }

        // Re-check under the shard write lock: a concurrent `set` may have
        // refreshed the entry since the read above.
        let removed = self
            .entries
            .remove_if(key, |_, entry| now.duration_since(entry.stored_at) >= self.ttl);
        if removed.is_some() {
            trace!(%key, "evicted expired cache entry");
        }
        None
    }

    /// Inserts or overwrites the entry for `key`, stamping it with the current time.
    pub fn set(&self, key: CacheKey, value: Value) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Number of stored entries, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[tokio::test(start_paused = true)]
    async fn get_after_set_within_ttl() {
        let cache = CacheStore::new(Duration::from_secs(300));
        cache.set(key("/a"), json!({"x": 1}));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(&key("/a")), Some(json!({"x": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_removed_on_read() {
        let cache = CacheStore::new(Duration::from_secs(300));
        cache.set(key("/a"), json!([1, 2]));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("/a")), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn set_restarts_the_clock() {
        let cache = CacheStore::new(Duration::from_secs(10));
        cache.set(key("/a"), json!(1));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set(key("/a"), json!(2));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get(&key("/a")), Some(json!(2)));
    }

    #[test]
    fn miss_has_no_side_effect() {
        let cache = CacheStore::default();
        cache.set(key("/b"), json!(null));
        assert_eq!(cache.get(&key("/a")), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ttl(), DEFAULT_TTL);
    }

    #[test]
    fn clones_share_entries() {
        let cache = CacheStore::default();
        let handle = cache.clone();
        handle.set(key("/shared"), json!("v"));
        assert_eq!(cache.get(&key("/shared")), Some(json!("v")));

        cache.clear();
        assert!(handle.is_empty());
    }

    #[test]
    fn keys_are_literal() {
        let cache = CacheStore::default();
        cache.set(key("/m?lat=1&lng=2"), json!("first"));
        assert_eq!(cache.get(&key("/m?lng=2&lat=1")), None);
        assert_eq!(cache.get(&key("/m?lat=1&lng=2")), Some(json!("first")));
    }

    #[test]
    fn key_from_request_target() {
        let raw = b"GET /dapi/menu/pl?lat=1&restaurantId=9 HTTP/1.1\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        assert_eq!(
            CacheKey::from_request(&request).as_str(),
            "/dapi/menu/pl?lat=1&restaurantId=9"
        );
    }
}
