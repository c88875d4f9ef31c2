//! In-memory key/value cache with per-entry expiry.
//!
//! Expired entries are still returned by [`TimedCache::get`], flagged as stale,
//! so a slow upstream refresh never leaves the dashboard empty.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Entry metadata without the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
}

pub struct TimedCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T> Default for TimedCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> TimedCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `data` under `key`, replacing any previous entry. Negative TTLs count as zero.
    pub fn set(&self, key: &str, data: T, ttl_minutes: i64) {
        let cached_at = Utc::now();
        let expires_at = cached_at + Duration::minutes(ttl_minutes.max(0));
        self.lock().insert(
            key.to_string(),
            CacheEntry {
                data,
                cached_at,
                expires_at,
            },
        );
    }

    /// The entry for `key`, expired or not.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.lock().get(key).cloned()
    }

    pub fn info(&self, key: &str) -> Option<CacheInfo> {
        let now = Utc::now();
        self.lock().get(key).map(|entry| CacheInfo {
            cached_at: entry.cached_at,
            expires_at: entry.expires_at,
            is_expired: entry.is_expired_at(now),
        })
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_entry_is_returned_unexpired() {
        let cache = TimedCache::new();
        cache.set("tickets", vec![1, 2, 3], 5);
        let entry = cache.get("tickets").unwrap();
        assert_eq!(entry.data, vec![1, 2, 3]);
        assert!(!entry.is_expired());
        assert_eq!(entry.expires_at - entry.cached_at, Duration::minutes(5));
    }

    #[test]
    fn test_zero_ttl_is_stale_but_available() {
        let cache = TimedCache::new();
        cache.set("prs", "data".to_string(), 0);
        let entry = cache.get("prs").unwrap();
        assert_eq!(entry.data, "data");
        assert!(entry.is_expired());
        assert!(cache.info("prs").unwrap().is_expired);
    }

    #[test]
    fn test_negative_ttl_is_clamped() {
        let cache = TimedCache::new();
        cache.set("k", 1, -10);
        let entry = cache.get("k").unwrap();
        assert_eq!(entry.expires_at, entry.cached_at);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_set_overwrites() {
        let cache = TimedCache::new();
        cache.set("k", 1, 5);
        cache.set("k", 2, 5);
        assert_eq!(cache.get("k").unwrap().data, 2);
    }

    #[test]
    fn test_missing_key() {
        let cache: TimedCache<u8> = TimedCache::new();
        assert!(cache.get("nope").is_none());
        assert!(cache.info("nope").is_none());
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let cache = TimedCache::new();
        cache.set("a", 1, 5);
        cache.set("b", 2, 5);
        cache.invalidate("a");
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").unwrap().data, 2);

        cache.invalidate_all();
        cache.invalidate_all();
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_info_serializes_camel_case() {
        let cache = TimedCache::new();
        cache.set("a", (), 1);
        let value = serde_json::to_value(cache.info("a").unwrap()).unwrap();
        assert!(value.get("cachedAt").is_some());
        assert_eq!(value["isExpired"], false);
    }
}
