//! reqwest-backed transport with connect-time address checks.

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::dns::{Addrs, Name, Resolving};
use reqwest::redirect;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::ValidationError;
use crate::security::ssrf::{AddressPolicy, Resolve};
use crate::transport::{Response, Transport, TransportError, TransportRequest};

type BoxError = Box<dyn StdError + Send + Sync>;

/// DNS resolver for reqwest that re-applies the SSRF address policy to the
/// addresses actually used for the connection.
pub struct GuardedResolver {
    inner: Arc<dyn Resolve>,
    policy: AddressPolicy,
}

impl GuardedResolver {
    pub fn new(inner: Arc<dyn Resolve>, policy: AddressPolicy) -> Self {
        Self { inner, policy }
    }
}

async fn guarded_lookup(inner: Arc<dyn Resolve>, policy: AddressPolicy, host: String) -> Result<Addrs, BoxError> {
    let addrs = inner.resolve(&host, 0).await?;
    for addr in &addrs {
        if let Err(range) = policy.check(*addr) {
            tracing::warn!(host = %host, %addr, range, "Blocked address at connect time");
            return Err(Box::new(ValidationError::BlockedAddress {
                host,
                addr: *addr,
                range,
            }));
        }
    }
    Ok(Box::new(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0))))
}

impl reqwest::dns::Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(guarded_lookup(self.inner.clone(), self.policy, name.as_str().to_string()))
    }
}

/// Default [`Transport`] built on a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig, policy: AddressPolicy, resolver: Arc<dyn Resolve>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            .pool_idle_timeout(Duration::from_secs(config.pool.idle_secs))
            .pool_max_idle_per_host(config.pool.max_per_host)
            // A redirect could point anywhere; targets are validated once.
            .redirect(redirect::Policy::none())
            // Resolution must happen here for the address guard to apply.
            .no_proxy()
            .dns_resolver(Arc::new(GuardedResolver::new(resolver, policy)))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
        })
    }

    /// Wrap a caller-built client. Its resolver and redirect settings are
    /// used as they are.
    pub fn from_client(client: reqwest::Client, max_response_bytes: usize) -> Self {
        Self {
            client,
            max_response_bytes,
        }
    }
}

/// Buffer the body, failing as soon as it is known to exceed `limit`.
async fn read_body(mut response: reqwest::Response, limit: usize) -> Result<Bytes, TransportError> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(TransportError::ResponseTooLarge { limit });
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(classify)? {
        if body.len() + chunk.len() > limit {
            return Err(TransportError::ResponseTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_body() || err.is_request() {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        TransportError::Connection(message)
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<Response, TransportError> {
        let started = Instant::now();
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = read_body(response, self.max_response_bytes).await?;

        Ok(Response {
            status,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }
}
