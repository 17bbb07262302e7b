//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! RequestSpec
//!     → fingerprint.rs (method + url + vary headers + body hash → key)
//!     → ResponseCache::get_or_compute
//!         hit  → cloned Response, no network
//!         miss → join or lead the key's flight → producer → store 2xx → Response
//!     → store.rs (CacheStore trait, MemoryStore LRU + TTL)
//! ```
//!
//! # Design Decisions
//! - Single-flight per key: concurrent misses share one cached result;
//!   uncacheable results release waiters to run in parallel
//! - Only successful responses are stored; errors are never cached
//! - A failing store degrades to a miss, never to a request failure

pub mod fingerprint;
pub mod store;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::Serialize;
use tokio::sync::watch;
use url::Url;

use crate::config::CacheConfig;
use crate::error::Error;
use crate::transport::Response;

pub use store::{CacheEntry, CacheError, CacheStore, MemoryStore};

/// Whether a value came from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    Miss,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: Option<usize>,
    pub max_size: usize,
}

#[derive(Debug, Clone)]
enum FlightState {
    Running,
    /// The leader's response, if it was cached.
    Done(Option<Response>),
}

impl FlightState {
    fn is_done(&self) -> bool {
        matches!(self, FlightState::Done(_))
    }

    fn shared(&self) -> Option<Response> {
        match self {
            FlightState::Done(response) => response.clone(),
            FlightState::Running => None,
        }
    }
}

/// Held by the caller running a flight. Dropping it ends the flight; an
/// unfinished one releases its waiters.
struct FlightLead<'a> {
    cache: &'a ResponseCache,
    key: &'a str,
    id: u64,
    tx: watch::Sender<FlightState>,
}

impl FlightLead<'_> {
    fn finish(self, shared: Option<Response>) {
        self.tx.send_replace(FlightState::Done(shared));
    }
}

impl Drop for FlightLead<'_> {
    fn drop(&mut self) {
        self.cache.inflight.remove_if(self.key, |_, (id, _)| *id == self.id);
    }
}

pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    max_size: usize,
    vary_headers: Vec<String>,
    cacheable_methods: Vec<Method>,
    inflight: DashMap<String, (u64, watch::Receiver<FlightState>)>,
    next_flight: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        let cacheable_methods = config
            .cacheable_methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .collect();
        Self {
            store,
            default_ttl: config.default_ttl(),
            max_size: config.max_size,
            vary_headers: config.vary_headers.clone(),
            cacheable_methods,
            inflight: DashMap::new(),
            next_flight: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_cacheable(&self, method: &Method) -> bool {
        self.cacheable_methods.contains(method)
    }

    pub fn key_for(&self, method: &Method, url: &Url, headers: &HeaderMap, body: &[u8]) -> String {
        fingerprint::fingerprint(method, url, headers, body, &self.vary_headers)
    }

    async fn lookup(&self, key: &str) -> Option<Response> {
        match self.store.get(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Get a fresh entry, counting the hit or miss.
    pub async fn get(&self, key: &str) -> Option<Response> {
        let found = self.lookup(key).await;
        self.count(found.is_some());
        found
    }

    /// Store `value` if it is a 2xx response. Returns whether it was stored.
    pub async fn put(&self, key: &str, value: &Response, ttl: Option<Duration>) -> bool {
        if !value.is_success() {
            return false;
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        match self.store.put(key, value.clone(), ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Cache store failed");
                false
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            tracing::warn!(error = %e, "Cache invalidation failed");
        }
    }

    pub async fn clear(&self) {
        if let Err(e) = self.store.clear().await {
            tracing::warn!(error = %e, "Cache clear failed");
        }
    }

    /// Return the cached value for `key`, or await `producer` and cache a
    /// successful result.
    ///
    /// The first caller to miss leads the flight and runs its producer.
    /// Callers arriving while it runs wait at most `max_wait` for it: a
    /// cached result is shared with them as a hit, anything else releases
    /// them to run their own producers concurrently. `producer` is dropped
    /// unpolled whenever the caller does not run it.
    pub async fn get_or_compute<F>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        max_wait: Duration,
        producer: F,
    ) -> Result<(Response, CacheStatus), Error>
    where
        F: Future<Output = Result<Response, Error>>,
    {
        if let Some(hit) = self.lookup(key).await {
            self.count(true);
            return Ok((hit, CacheStatus::Hit));
        }

        let joined = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(flight) => Err(flight.get().1.clone()),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(FlightState::Running);
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                slot.insert((id, rx));
                Ok(FlightLead { cache: self, key, id, tx })
            }
        };

        let lead = match joined {
            Ok(lead) => lead,
            Err(mut rx) => {
                let shared = {
                    let waited = tokio::time::timeout(max_wait, rx.wait_for(FlightState::is_done)).await;
                    match waited {
                        Err(_) => return Err(Error::Timeout(max_wait)),
                        Ok(Ok(state)) => state.shared(),
                        // Leader cancelled.
                        Ok(Err(_)) => None,
                    }
                };
                if let Some(response) = shared {
                    self.count(true);
                    return Ok((response, CacheStatus::Hit));
                }
                self.count(false);
                let response = producer.await?;
                self.put(key, &response, ttl).await;
                return Ok((response, CacheStatus::Miss));
            }
        };

        self.count(false);
        let result = producer.await;
        let shared = match &result {
            Ok(response) if self.put(key, response, ttl).await => Some(response.clone()),
            _ => None,
        };
        lead.finish(shared);
        result.map(|response| (response, CacheStatus::Miss))
    }

    fn count(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            entries: self.store.entry_count(),
            max_size: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicUsize;

    fn response(status: u16, body: &'static str) -> Response {
        Response {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            elapsed: Duration::ZERO,
        }
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn cache() -> Arc<ResponseCache> {
        let config = CacheConfig::default();
        Arc::new(ResponseCache::new(&config, Arc::new(MemoryStore::new(config.max_size))))
    }

    #[tokio::test(start_paused = true)]
    async fn put_get_and_expiry() {
        let cache = cache();
        assert!(cache.put("k", &response(200, "v"), Some(Duration::from_secs(10))).await);
        assert_eq!(cache.get("k").await.unwrap().text(), "v");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get("k").await.is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn errors_and_non_2xx_are_not_stored() {
        let cache = cache();
        assert!(!cache.put("k", &response(503, "down"), None).await);

        let failed = cache
            .get_or_compute("k", None, WAIT, async {
                Err(Error::Transport(TransportError::Connection("refused".into())))
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_compute_once() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared", None, WAIT, async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(response(200, "once"))
                    })
                    .await
            }));
        }

        let mut hits = 0;
        for task in tasks {
            let (value, status) = task.await.unwrap().unwrap();
            assert_eq!(value.text(), "once");
            if status == CacheStatus::Hit {
                hits += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hits, 7);
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn uncacheable_results_release_waiters() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let started = tokio::time::Instant::now();

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_compute("failing", None, WAIT, async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(response(503, "down"))
                    })
                    .await
            }));
        }
        for task in tasks {
            let (value, status) = task.await.unwrap().unwrap();
            assert_eq!(value.status.as_u16(), 503);
            assert_eq!(status, CacheStatus::Miss);
        }

        // Leader, then every waiter at once; not one after another.
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_on_a_flight_is_bounded() {
        let cache = cache();
        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", None, WAIT, async {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(response(200, "late"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        let waited = cache
            .get_or_compute("slow", None, Duration::from_millis(500), async { Ok(response(200, "mine")) })
            .await;
        assert!(matches!(waited, Err(Error::Timeout(_))));
        assert_eq!(started.elapsed(), Duration::from_millis(500));

        let (value, _) = leader.await.unwrap().unwrap();
        assert_eq!(value.text(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_leader_releases_waiters() {
        let cache = cache();
        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("k", None, WAIT, async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(response(200, "never"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("k", None, WAIT, async { Ok(response(200, "own")) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        let (value, status) = follower.await.unwrap().unwrap();
        assert_eq!(value.text(), "own");
        assert_eq!(status, CacheStatus::Miss);
    }

    #[tokio::test]
    async fn hit_skips_producer() {
        let cache = cache();
        cache.put("k", &response(200, "cached"), None).await;
        let ran = AtomicUsize::new(0);
        let (value, status) = cache
            .get_or_compute("k", None, WAIT, async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(response(200, "fresh"))
            })
            .await
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(value.text(), "cached");
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Response>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn put(&self, _key: &str, _value: Response, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn broken_store_degrades_to_miss() {
        let cache = ResponseCache::new(&CacheConfig::default(), Arc::new(BrokenStore));
        let (value, status) = cache
            .get_or_compute("k", None, WAIT, async { Ok(response(200, "fresh")) })
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(value.text(), "fresh");
    }
}
