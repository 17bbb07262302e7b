//! Cache storage backends.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use crate::transport::Response;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable key/value storage for cached responses.
///
/// Implementations must never return an entry past its expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Response>, CacheError>;

    async fn put(&self, key: &str, value: Response, ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Current entry count, if the backend can report it cheaply.
    fn entry_count(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Response,
    pub expires_at: Instant,
}

/// In-process LRU store with per-entry expiry.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Response>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Response, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        if let Some((evicted, _)) = self.entries.lock().push(key.to_string(), entry) {
            if evicted != key {
                tracing::trace!(key = %evicted, "Evicted least recently used cache entry");
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().pop(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.lock().clear();
        Ok(())
    }

    fn entry_count(&self) -> Option<usize> {
        Some(self.entries.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;

    fn response(body: &'static str) -> Response {
        Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            elapsed: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new(10);
        store.put("k", response("v"), Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().text(), "v");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.entry_count(), Some(0));
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        let store = MemoryStore::new(2);
        let ttl = Duration::from_secs(60);
        store.put("a", response("a"), ttl).await.unwrap();
        store.put("b", response("b"), ttl).await.unwrap();
        store.get("a").await.unwrap();
        store.put("c", response("c"), ttl).await.unwrap();

        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let store = MemoryStore::new(4);
        let ttl = Duration::from_secs(60);
        store.put("a", response("a"), ttl).await.unwrap();
        store.put("b", response("b"), ttl).await.unwrap();
        store.remove("a").await.unwrap();
        assert_eq!(store.entry_count(), Some(1));
        store.clear().await.unwrap();
        assert_eq!(store.entry_count(), Some(0));
    }
}
