//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use slayer::config::ClientConfig;
use slayer::observability::MetricsSink;
use slayer::pipeline::Outcome;
use slayer::security::Resolve;
use slayer::transport::{Response, Transport, TransportError, TransportRequest};

/// A public address used by fake resolvers.
pub const PUBLIC_ADDR: &str = "93.184.216.34";

/// Start a simple mock backend that returns a fixed 200 response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Requests in these tests fit in one read.
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

pub fn response(status: u16, body: &str) -> Response {
    Response {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body: Bytes::from(body.to_string()),
        elapsed: Duration::from_millis(1),
    }
}

/// Replays scripted outcomes in order, then repeats `fallback`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Response, TransportError>>>,
    fallback: Result<Response, TransportError>,
    latency: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn always(status: u16) -> Self {
        Self::new(Vec::new(), Ok(response(status, "ok")))
    }

    pub fn new(
        script: Vec<Result<Response, TransportError>>,
        fallback: Result<Response, TransportError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<Response, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Resolves every host to fixed addresses.
pub struct StaticResolver(pub Vec<IpAddr>);

impl StaticResolver {
    pub fn public() -> Self {
        Self(vec![PUBLIC_ADDR.parse().unwrap()])
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn resolve(&self, _host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        Ok(self.0.clone())
    }
}

/// Captures every measurement.
#[derive(Default)]
pub struct RecordingMetrics {
    pub attempts: Mutex<Vec<(String, Outcome)>>,
    pub requests: Mutex<Vec<(String, Outcome)>>,
    pub cache_lookups: Mutex<Vec<bool>>,
}

impl MetricsSink for RecordingMetrics {
    fn record_attempt(&self, destination: &str, outcome: &Outcome, _latency: Duration) {
        self.attempts.lock().push((destination.to_string(), *outcome));
    }

    fn record_request(&self, destination: &str, outcome: &Outcome, _latency: Duration) {
        self.requests.lock().push((destination.to_string(), *outcome));
    }

    fn record_cache_lookup(&self, hit: bool) {
        self.cache_lookups.lock().push(hit);
    }
}

/// Defaults with fast, deterministic retries and generous limits.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.retry.jitter = false;
    config.rate_limit.capacity = 10_000;
    config.rate_limit.refill_per_sec = 10_000.0;
    config.observability.metrics_enabled = false;
    config.observability.audit_enabled = false;
    config
}

/// Config that can reach the loopback mock backends.
pub fn loopback_config() -> ClientConfig {
    let mut config = test_config();
    config.ssrf.block_localhost = false;
    config.ssrf.block_private = false;
    config
}
