use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;

use storedesk_core::DomainError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

impl From<CacheError> for DomainError {
    fn from(err: CacheError) -> Self {
        DomainError::storage(err.to_string())
    }
}

/// String key/value cache with optional expiry.
#[async_trait::async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Returns the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, CacheError>;

    /// Remove every key starting with `prefix`, except the key equal to
    /// `exclude`. Returns the number of keys removed.
    async fn delete_by_prefix(&self, prefix: &str, exclude: Option<&str>) -> Result<u64, CacheError>;

    /// Atomically increment the integer at `key` (missing counts as 0) and
    /// return the new value. The counter never expires.
    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// Store `value` at `key` only while `guard` still holds `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    async fn set_if_unchanged(
        &self,
        guard: &str,
        expected: Option<&str>,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;
}

#[async_trait::async_trait]
impl<C: KeyValueCache + ?Sized> KeyValueCache for Arc<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        (**self).delete(key).await
    }

    async fn delete_by_prefix(&self, prefix: &str, exclude: Option<&str>) -> Result<u64, CacheError> {
        (**self).delete_by_prefix(prefix, exclude).await
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        (**self).incr(key).await
    }

    async fn set_if_unchanged(
        &self,
        guard: &str,
        expected: Option<&str>,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        (**self).set_if_unchanged(guard, expected, key, value, ttl).await
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    inner: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CacheError {
        CacheError::Backend("lock poisoned".to_string())
    }

    fn entry(value: &str, ttl: Option<Duration>) -> Entry {
        Entry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    /// Live keys, sorted. Intended for tests and diagnostics.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let Ok(map) = self.inner.read() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = map
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait::async_trait]
impl KeyValueCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let map = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(map
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        map.insert(key.to_string(), Self::entry(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        Ok(map.remove(key).map_or(0, |_| 1))
    }

    async fn delete_by_prefix(&self, prefix: &str, exclude: Option<&str>) -> Result<u64, CacheError> {
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        let before = map.len();
        map.retain(|k, _| !k.starts_with(prefix) || Some(k.as_str()) == exclude);
        Ok((before - map.len()) as u64)
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        let now = Instant::now();
        let current = match map.get(key).filter(|e| e.is_live(now)) {
            Some(e) => e.value.parse::<i64>().map_err(|_| {
                CacheError::Backend(format!("value at {key} is not an integer"))
            })?,
            None => 0,
        };
        let next = current + 1;
        map.insert(key.to_string(), Self::entry(&next.to_string(), None));
        Ok(next)
    }

    async fn set_if_unchanged(
        &self,
        guard: &str,
        expected: Option<&str>,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        let now = Instant::now();
        let current = map.get(guard).filter(|e| e.is_live(now)).map(|e| e.value.as_str());
        if current != expected {
            return Ok(false);
        }
        map.insert(key.to_string(), Self::entry(value, ttl));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn set_get_delete() {
        let cache = InMemoryCache::new();
        cache.set("a", "1", None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(cache.delete("a").await.unwrap(), 1);
        assert_eq!(cache.delete("a").await.unwrap(), 0);
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn expired_entries_are_invisible() {
        let cache = InMemoryCache::new();
        cache.set("a", "1", Some(Duration::ZERO)).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert!(cache.keys().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn prefix_delete_honours_exclusion() {
        let cache = InMemoryCache::new();
        for key in ["tok:1:a", "tok:1:b", "tok:12:c", "user:1"] {
            cache.set(key, "x", None).await.unwrap();
        }
        let removed = cache.delete_by_prefix("tok:1:", Some("tok:1:b")).await.unwrap();
        assert_eq!(removed, 1);
        // bytewise: '2' sorts before ':'
        assert_eq!(cache.keys(), vec!["tok:12:c", "tok:1:b", "user:1"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn incr_starts_from_zero() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.incr("gen").await.unwrap(), 1);
        assert_eq!(cache.incr("gen").await.unwrap(), 2);
        cache.set("word", "abc", None).await.unwrap();
        assert!(cache.incr("word").await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn guarded_set_requires_unchanged_guard() {
        let cache = InMemoryCache::new();
        assert!(cache.set_if_unchanged("gen", None, "k", "v1", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v1"));

        cache.incr("gen").await.unwrap();
        assert!(!cache.set_if_unchanged("gen", None, "k", "v2", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v1"));

        assert!(cache.set_if_unchanged("gen", Some("1"), "k", "v3", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v3"));
    }
}
