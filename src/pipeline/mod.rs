//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! RequestSpec
//!     → TargetValidator (scheme, blocklist, resolved address ranges, body size)
//!     → ResponseCache lookup (hit → return, bypassing limiter and breaker)
//!     → loop per attempt:
//!         RateLimiter admission   (reject → RateLimited, no retry)
//!         CircuitBreaker permit   (open → CircuitOpen, no retry)
//!         request interceptors
//!         deadline[ ConnectionPool session → Transport::send ]
//!         permit.record(verdict), MetricsSink::record_attempt
//!         response interceptors
//!         RetryPolicy: retryable and attempts left → sleep backoff, again
//!     → cache store (2xx only)
//!     → MetricsSink::record_request, AuditSink event
//! ```
//!
//! # Design Decisions
//! - Registries are owned by the pipeline instance; nothing is global
//! - Retry re-enters admission exactly once per attempt
//! - Every terminal result, rejections and cache hits included, is reported
//!   to metrics and audit before `execute` returns

pub mod interceptor;
pub mod request;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheStats, CacheStatus, CacheStore, MemoryStore, ResponseCache};
use crate::config::{validate_config, CacheBackend, ClientConfig, ConfigError};
use crate::error::{Error, ValidationError};
use crate::observability::{
    AuditEvent, AuditSink, MetricsFacadeSink, MetricsSink, NoopAudit, NoopMetrics, TracingAuditSink,
};
use crate::pool::{ConnectionPool, PoolStats};
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{CircuitBreakerRegistry, CircuitSnapshot, RetryPolicy, Transition, TransitionListener};
use crate::security::{Admission, Destination, RateLimiter, Resolve, SystemResolver, TargetValidator, ValidatedTarget};
use crate::transport::{ReqwestTransport, Response, Transport, TransportRequest};

pub use interceptor::{DefaultHeaders, RequestInterceptor, ResponseInterceptor};
pub use load_test::{LatencySummary, LoadPlan, LoadTestReport, LoadTester};
pub use request::{Attempt, Outcome, RequestSpec, RequestSpecBuilder};

/// Per-call bookkeeping used for terminal reporting.
#[derive(Debug, Default)]
struct CallTrace {
    destination: Option<String>,
    attempts: Vec<Attempt>,
    cache: Option<CacheStatus>,
}

/// Snapshot of the pipeline's shared state.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub cache: Option<CacheStats>,
    pub pool: PoolStats,
    pub circuits: Vec<CircuitSnapshot>,
}

/// Forwards breaker transitions to the audit trail.
struct AuditTransitions(Arc<dyn AuditSink>);

impl TransitionListener for AuditTransitions {
    fn on_transition(&self, destination: &str, transition: Transition) {
        self.0.record_event(
            AuditEvent::CircuitTransition,
            json!({
                "destination": destination,
                "from": transition.from,
                "to": transition.to,
            }),
        );
    }
}

/// The resilient request client.
pub struct RequestPipeline {
    config: ClientConfig,
    validator: TargetValidator,
    limiter: RateLimiter,
    breakers: CircuitBreakerRegistry,
    cache: Option<ResponseCache>,
    pool: ConnectionPool,
    retry: RetryPolicy,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    metrics: Arc<dyn MetricsSink>,
    audit: Arc<dyn AuditSink>,
}

impl RequestPipeline {
    pub fn builder(config: ClientConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            transport: None,
            resolver: None,
            cache_store: None,
            metrics: None,
            audit: None,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            cache: self.cache.as_ref().map(ResponseCache::stats),
            pool: self.pool.stats(),
            circuits: self.breakers.snapshot(),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run one logical request through the full pipeline.
    pub async fn execute(&self, spec: &RequestSpec) -> Result<Response, Error> {
        self.execute_traced(spec).await.0
    }

    /// Run several requests concurrently. Results keep the order of `specs`.
    pub async fn execute_all(&self, specs: &[RequestSpec]) -> Vec<Result<Response, Error>> {
        futures_util::future::join_all(specs.iter().map(|spec| self.execute(spec))).await
    }

    /// Like [`execute`](Self::execute), also returning the transport attempts
    /// made. A cache hit or a rejection before sending has none.
    pub(crate) async fn execute_traced(&self, spec: &RequestSpec) -> (Result<Response, Error>, Vec<Attempt>) {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let span = tracing::info_span!("request", %request_id, method = %spec.method(), url = %spec.url());

        let mut trace = CallTrace::default();
        let result = self.run(spec, &mut trace).instrument(span.clone()).await;
        span.in_scope(|| self.report(request_id, spec, &result, &trace, started.elapsed()));
        (result, trace.attempts)
    }

    async fn run(&self, spec: &RequestSpec, trace: &mut CallTrace) -> Result<Response, Error> {
        let body_len = spec.body().len();
        if body_len > self.config.max_body_bytes {
            return Err(ValidationError::BodyTooLarge {
                size: body_len,
                limit: self.config.max_body_bytes,
            }
            .into());
        }

        let target = self.validator.validate(spec.url()).await?;
        trace.destination = Some(target.destination.to_string());

        let cache = match &self.cache {
            Some(cache) if spec.cache_enabled() && cache.is_cacheable(spec.method()) => cache,
            _ => return self.attempt_loop(spec, &target, trace).await,
        };

        let key = cache.key_for(spec.method(), &target.url, spec.headers(), spec.body());
        let attempts = self.attempt_loop(spec, &target, &mut *trace);
        let (response, status) = cache
            .get_or_compute(&key, spec.cache_ttl(), self.deadline(spec), attempts)
            .await?;
        trace.cache = Some(status);
        self.metrics.record_cache_lookup(status == CacheStatus::Hit);

        if status == CacheStatus::Hit {
            tracing::debug!("Served from cache");
            if self.config.cache.count_hits_against_rate_limit {
                self.admit(&target.destination)?;
            }
        }
        Ok(response)
    }

    /// Per-attempt deadline, also bounding the wait on a concurrent identical request.
    fn deadline(&self, spec: &RequestSpec) -> Duration {
        spec.timeout().unwrap_or_else(|| self.config.timeouts.request())
    }

    fn admit(&self, destination: &Destination) -> Result<(), Error> {
        let key = self.limiter.key_for(destination);
        match self.limiter.try_acquire(&key) {
            Admission::Admitted => Ok(()),
            Admission::Rejected { retry_after } => Err(Error::RateLimited { key, retry_after }),
        }
    }

    async fn attempt_loop(
        &self,
        spec: &RequestSpec,
        target: &ValidatedTarget,
        trace: &mut CallTrace,
    ) -> Result<Response, Error> {
        let custom;
        let retry = match spec.retry() {
            Some(config) => {
                custom = RetryPolicy::from_config(config);
                &custom
            }
            None => &self.retry,
        };
        let deadline = self.deadline(spec);
        let destination = target.destination.to_string();
        let breaker = self
            .breakers
            .is_enabled()
            .then(|| self.breakers.get(&target.destination));

        let mut number = 1;
        loop {
            self.admit(&target.destination)?;
            let permit = breaker.as_ref().map(|b| b.acquire()).transpose()?;

            let mut request = TransportRequest {
                method: spec.method().clone(),
                url: target.url.clone(),
                headers: spec.headers().clone(),
                body: spec.body().clone(),
                timeout: deadline,
            };
            for interceptor in &self.request_interceptors {
                interceptor.on_request(&mut request)?;
            }

            let started = Instant::now();
            let mut outcome = self.dispatch(&target.destination, request.clone(), deadline).await;
            let latency = started.elapsed();

            if let Some(permit) = permit {
                permit.record(self.breakers.verdict(&outcome));
            }
            let attempt = Attempt {
                number,
                started,
                latency,
                outcome: Outcome::of(&outcome),
            };
            self.metrics.record_attempt(&destination, &attempt.outcome, latency);
            trace.attempts.push(attempt);

            if let Ok(response) = outcome.as_mut() {
                for interceptor in &self.response_interceptors {
                    interceptor.on_response(&request, response);
                }
            }

            if !retry.should_retry(number, &outcome) {
                return match outcome {
                    Err(e) if retry.max_retries() > 0 && retry.is_retryable_error(&e) => {
                        Err(Error::ExhaustedRetries {
                            attempts: number,
                            source: Box::new(e),
                        })
                    }
                    other => other,
                };
            }

            let delay = retry.delay_before(number);
            tracing::debug!(
                attempt = number,
                outcome = %Outcome::of(&outcome),
                delay_ms = delay.as_millis() as u64,
                "Retrying"
            );
            tokio::time::sleep(delay).await;
            number += 1;
        }
    }

    /// Pool wait and send under one deadline. Expiry drops the session.
    async fn dispatch(
        &self,
        destination: &Destination,
        request: TransportRequest,
        deadline: Duration,
    ) -> Result<Response, Error> {
        with_deadline(deadline, self.send_pooled(destination, request)).await
    }

    async fn send_pooled(&self, destination: &Destination, request: TransportRequest) -> Result<Response, Error> {
        let session = self.pool.acquire(destination).await?;
        Ok(session.send(request).await?)
    }

    fn report(
        &self,
        request_id: Uuid,
        spec: &RequestSpec,
        result: &Result<Response, Error>,
        trace: &CallTrace,
        elapsed: Duration,
    ) {
        let destination = trace.destination.as_deref().unwrap_or("unvalidated");
        let outcome = Outcome::of(result);
        self.metrics.record_request(destination, &outcome, elapsed);

        let cache_hit = trace.cache == Some(CacheStatus::Hit);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        match result {
            Ok(response) => {
                tracing::debug!(status = response.status.as_u16(), attempts = trace.attempts.len(), cache_hit, "Request completed");
                self.audit.record_event(
                    AuditEvent::RequestCompleted,
                    json!({
                        "request_id": request_id,
                        "method": spec.method().as_str(),
                        "url": spec.url(),
                        "destination": destination,
                        "status": response.status.as_u16(),
                        "attempts": trace.attempts.len(),
                        "cache_hit": cache_hit,
                        "elapsed_ms": elapsed_ms,
                    }),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, kind = %e.kind(), attempts = trace.attempts.len(), "Request failed");
                self.audit.record_event(
                    AuditEvent::RequestFailed,
                    json!({
                        "request_id": request_id,
                        "method": spec.method().as_str(),
                        "url": spec.url(),
                        "destination": destination,
                        "error": e.to_string(),
                        "kind": e.kind(),
                        "attempts": trace.attempts.len(),
                        "retry_after_ms": e.retry_after().map(|d| d.as_millis() as u64),
                        "elapsed_ms": elapsed_ms,
                    }),
                );
            }
        }
    }
}

/// Builder for [`RequestPipeline`]. Unset collaborators get defaults.
pub struct PipelineBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn Resolve>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    audit: Option<Arc<dyn AuditSink>>,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
}

impl PipelineBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Runs after the built-in default-headers interceptor.
    pub fn request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request_interceptors.push(interceptor);
        self
    }

    pub fn response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response_interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> Result<RequestPipeline, Error> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Invalid)?;

        let resolver: Arc<dyn Resolve> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(SystemResolver),
        };
        let validator = TargetValidator::new(&config.ssrf).with_resolver(resolver.clone());

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config, validator.policy(), resolver)?),
        };

        let cache = if config.cache.enabled {
            let store: Arc<dyn CacheStore> = match self.cache_store {
                Some(store) => store,
                None => match config.cache.backend {
                    CacheBackend::Memory => Arc::new(MemoryStore::new(config.cache.max_size)),
                },
            };
            Some(ResponseCache::new(&config.cache, store))
        } else {
            None
        };

        let metrics: Arc<dyn MetricsSink> = match self.metrics {
            Some(metrics) => metrics,
            None if config.observability.metrics_enabled => Arc::new(MetricsFacadeSink),
            None => Arc::new(NoopMetrics),
        };
        let audit: Arc<dyn AuditSink> = match self.audit {
            Some(audit) => audit,
            None if config.observability.audit_enabled => Arc::new(TracingAuditSink),
            None => Arc::new(NoopAudit),
        };

        let mut request_interceptors: Vec<Arc<dyn RequestInterceptor>> =
            vec![Arc::new(DefaultHeaders::from_config(&config)?)];
        request_interceptors.extend(self.request_interceptors);

        tracing::debug!(
            rate_limit = config.rate_limit.enabled,
            circuit_breaker = config.circuit_breaker.enabled,
            cache = config.cache.enabled,
            ssrf = config.ssrf.enabled,
            max_retries = config.retry.max_retries,
            "Request pipeline built"
        );

        Ok(RequestPipeline {
            validator,
            limiter: RateLimiter::new(config.rate_limit.clone()),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone())
                .with_listener(Arc::new(AuditTransitions(audit.clone()))),
            cache,
            pool: ConnectionPool::new(&config.pool, transport),
            retry: RetryPolicy::from_config(&config.retry),
            request_interceptors,
            response_interceptors: self.response_interceptors,
            metrics,
            audit,
            config,
        })
    }
}
