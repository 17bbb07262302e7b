//! Request and response hooks.
//!
//! Interceptors run in registration order around the transport step of
//! every attempt, outside any pipeline lock.

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use crate::config::ClientConfig;
use crate::error::{Error, ValidationError};
use crate::transport::{Response, TransportRequest};

pub trait RequestInterceptor: Send + Sync {
    /// Inspect or modify an outgoing attempt. An error aborts the call.
    fn on_request(&self, request: &mut TransportRequest) -> Result<(), Error>;
}

pub trait ResponseInterceptor: Send + Sync {
    fn on_response(&self, request: &TransportRequest, response: &mut Response);
}

/// Adds configured default headers and a User-Agent to requests lacking them.
pub struct DefaultHeaders {
    headers: HeaderMap,
    user_agents: Vec<HeaderValue>,
}

impl DefaultHeaders {
    pub fn from_config(config: &ClientConfig) -> Result<Self, ValidationError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ValidationError::InvalidHeader(format!("name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ValidationError::InvalidHeader(format!("value of '{name}'")))?;
            headers.insert(name, value);
        }

        let user_agents = config
            .user_agents
            .iter()
            .map(|ua| {
                HeaderValue::from_str(ua).map_err(|_| ValidationError::InvalidHeader(format!("user agent '{ua}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { headers, user_agents })
    }
}

impl RequestInterceptor for DefaultHeaders {
    fn on_request(&self, request: &mut TransportRequest) -> Result<(), Error> {
        for (name, value) in &self.headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        if !request.headers.contains_key(USER_AGENT) {
            let agent = self
                .user_agents
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static(concat!("slayer/", env!("CARGO_PKG_VERSION"))));
            request.headers.insert(USER_AGENT, agent);
        }
        Ok(())
    }
}
