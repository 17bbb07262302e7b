//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline produces:
//!     → logging.rs (structured log events, request_id span per call)
//!     → metrics.rs (MetricsSink: attempt + terminal counters/histograms)
//!     → audit.rs (AuditSink: request, circuit and load-test events)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or pretty)
//!     → Any `metrics` recorder installed by the embedding application
//!     → Audit routing via the `slayer::audit` tracing target
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every log line of a call
//! - Sinks are traits so embedders and tests can capture output

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, NoopAudit, TracingAuditSink};
pub use logging::init_logging;
pub use metrics::{MetricsFacadeSink, MetricsSink, NoopMetrics};
