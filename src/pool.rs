//! Bounded connection pool.
//!
//! # Responsibilities
//! - Cap concurrent in-flight requests globally and per destination
//! - Hand out [`PooledSession`]s that forward to the shared transport
//! - Release slots deterministically when a session is dropped, including
//!   when the owning future is cancelled by a timeout
//!
//! # Design Decisions
//! - Semaphore permits owned by the session (no manual bookkeeping on release)
//! - Per-destination limit acquired before the global one, so a caller
//!   waiting on a busy host never holds a global slot
//! - Waiting is unbounded here; callers wrap `acquire` in the attempt deadline

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::security::ssrf::Destination;
use crate::transport::{Response, Transport, TransportError, TransportRequest};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("connection pool is closed")]
    Closed,
}

/// Pool usage counters.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub max_connections: usize,
    pub max_per_host: usize,
    pub total_acquired: u64,
    pub utilization: f64,
}

pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    global: Arc<Semaphore>,
    per_host: DashMap<String, Arc<Semaphore>>,
    max_connections: usize,
    max_per_host: usize,
    active: Arc<AtomicUsize>,
    total_acquired: AtomicU64,
}

impl ConnectionPool {
    pub fn new(config: &PoolConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            global: Arc::new(Semaphore::new(config.max_connections)),
            per_host: DashMap::new(),
            max_connections: config.max_connections,
            max_per_host: config.max_per_host,
            active: Arc::new(AtomicUsize::new(0)),
            total_acquired: AtomicU64::new(0),
        }
    }

    /// Wait for a slot to `destination`.
    pub async fn acquire(&self, destination: &Destination) -> Result<PooledSession, PoolError> {
        let host_limit = self
            .per_host
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_host)))
            .clone();

        let host_permit = host_limit.acquire_owned().await.map_err(|_| PoolError::Closed)?;
        let global_permit = self.global.clone().acquire_owned().await.map_err(|_| PoolError::Closed)?;

        self.active.fetch_add(1, Ordering::Relaxed);
        self.total_acquired.fetch_add(1, Ordering::Relaxed);

        Ok(PooledSession {
            transport: self.transport.clone(),
            active: self.active.clone(),
            _host_permit: host_permit,
            _global_permit: global_permit,
        })
    }

    pub fn stats(&self) -> PoolStats {
        let active = self.active.load(Ordering::Relaxed);
        PoolStats {
            active,
            max_connections: self.max_connections,
            max_per_host: self.max_per_host,
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            utilization: if self.max_connections == 0 {
                0.0
            } else {
                active as f64 / self.max_connections as f64
            },
        }
    }

    /// Stop handing out sessions. Waiting and future `acquire` calls fail.
    pub fn close(&self) {
        self.global.close();
        for host in self.per_host.iter() {
            host.value().close();
        }
    }
}

/// A checked-out slot. Dropping it returns the slot to the pool.
pub struct PooledSession {
    transport: Arc<dyn Transport>,
    active: Arc<AtomicUsize>,
    _host_permit: OwnedSemaphorePermit,
    _global_permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub async fn send(&self, request: TransportRequest) -> Result<Response, TransportError> {
        self.transport.send(request).await
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NeverTransport;

    #[async_trait]
    impl Transport for NeverTransport {
        async fn send(&self, _request: TransportRequest) -> Result<Response, TransportError> {
            Err(TransportError::Other("unused".into()))
        }
    }

    fn pool(max_connections: usize, max_per_host: usize) -> ConnectionPool {
        ConnectionPool::new(
            &PoolConfig {
                max_connections,
                max_per_host,
                idle_secs: 90,
            },
            Arc::new(NeverTransport),
        )
    }

    fn dest(host: &str) -> Destination {
        Destination { scheme: "http".into(), host: host.into(), port: 80 }
    }

    #[tokio::test(start_paused = true)]
    async fn per_host_limit_blocks_until_release() {
        let pool = pool(10, 1);
        let first = pool.acquire(&dest("a")).await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(100), pool.acquire(&dest("a"))).await;
        assert!(waiting.is_err());

        // Other hosts are unaffected.
        let _other = pool.acquire(&dest("b")).await.unwrap();
        assert_eq!(pool.stats().active, 2);

        drop(first);
        assert!(pool.acquire(&dest("a")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn global_limit_spans_hosts() {
        let pool = pool(1, 5);
        let _held = pool.acquire(&dest("a")).await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(100), pool.acquire(&dest("b"))).await;
        assert!(waiting.is_err());
        let stats = pool.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.utilization, 1.0);
        assert_eq!(stats.total_acquired, 1);
    }

    #[tokio::test]
    async fn closed_pool_rejects() {
        let pool = pool(1, 1);
        pool.close();
        assert_eq!(pool.acquire(&dest("a")).await.err(), Some(PoolError::Closed));
    }
}
