//! Request description and per-attempt records.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tokio::time::Instant;

use crate::config::{retry_issues, RetryConfig};
use crate::error::{Error, ErrorKind, ValidationError};
use crate::transport::Response;

/// An immutable description of one logical request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    timeout: Option<Duration>,
    cache: bool,
    cache_ttl: Option<Duration>,
    retry: Option<RetryConfig>,
}

impl RequestSpec {
    pub fn builder(method: Method, url: impl Into<String>) -> RequestSpecBuilder {
        RequestSpecBuilder {
            spec: RequestSpec {
                method,
                url: url.into(),
                headers: HeaderMap::new(),
                body: Bytes::new(),
                timeout: None,
                cache: true,
                cache_ttl: None,
                retry: None,
            },
            error: None,
        }
    }

    pub fn get(url: impl Into<String>) -> RequestSpecBuilder {
        Self::builder(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> RequestSpecBuilder {
        Self::builder(Method::POST, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Per-attempt deadline overriding the configured one.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn retry(&self) -> Option<&RetryConfig> {
        self.retry.as_ref()
    }
}

/// Builder for [`RequestSpec`]. Header errors surface from [`build`](Self::build).
#[derive(Debug)]
pub struct RequestSpecBuilder {
    spec: RequestSpec,
    error: Option<ValidationError>,
}

impl RequestSpecBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.spec.headers.append(name, value);
            }
            (Err(_), _) => self.error = Some(ValidationError::InvalidHeader(format!("name '{name}'"))),
            (_, Err(_)) => self.error = Some(ValidationError::InvalidHeader(format!("value of '{name}'"))),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.spec.body = body.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = Some(timeout);
        self
    }

    /// Skip the response cache for this request.
    pub fn no_cache(mut self) -> Self {
        self.spec.cache = false;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.spec.cache_ttl = Some(ttl);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.spec.retry = Some(retry);
        self
    }

    pub fn build(self) -> Result<RequestSpec, ValidationError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if let Some(retry) = &self.spec.retry {
            let issues = retry_issues(retry);
            if !issues.is_empty() {
                let joined: Vec<String> = issues.iter().map(ToString::to_string).collect();
                return Err(ValidationError::InvalidRetry(joined.join("; ")));
            }
        }
        Ok(self.spec)
    }
}

/// Classified result of an attempt or of a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Status(u16),
    Failed(ErrorKind),
}

impl Outcome {
    pub fn of(result: &Result<Response, Error>) -> Self {
        match result {
            Ok(response) => Outcome::Status(response.status.as_u16()),
            Err(e) => Outcome::Failed(e.kind()),
        }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Status(code) => write!(f, "{code}"),
            Outcome::Failed(kind) => f.write_str(kind.as_str()),
        }
    }
}

/// One transport attempt within a call.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based.
    pub number: u32,
    pub started: Instant,
    pub latency: Duration,
    pub outcome: Outcome,
}
