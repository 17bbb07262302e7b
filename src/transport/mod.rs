//! Transport abstraction.
//!
//! The pipeline never touches sockets itself. Every attempt is handed to a
//! [`Transport`] as a fully formed [`TransportRequest`]; the default
//! implementation is [`ReqwestTransport`], and tests substitute fakes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use url::Url;

mod reqwest_transport;

pub use reqwest_transport::{GuardedResolver, ReqwestTransport};

/// Failure reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connect, reset, DNS or body-read failure.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out")]
    Timeout,

    /// The response body grew past the configured limit.
    #[error("response body exceeds the {limit} byte limit")]
    ResponseTooLarge { limit: usize },

    /// Anything else (malformed request, redirect loop, protocol error).
    #[error("{0}")]
    Other(String),
}

/// One attempt's request, as sent on the wire.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Time from send to last body byte.
    pub elapsed: Duration,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<Response, TransportError>;
}
