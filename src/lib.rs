//! Resilient HTTP request and load-generation client.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                    REQUEST PIPELINE                      │
//!                 │                                                          │
//!   RequestSpec   │  ┌──────────┐    ┌─────────┐    ┌──────────────┐         │
//!   ──────────────┼─▶│ security │───▶│  cache  │───▶│ rate limiter │         │
//!                 │  │   ssrf   │    │  (LRU)  │    │ + breaker    │         │
//!                 │  └──────────┘    └────┬────┘    └──────┬───────┘         │
//!                 │                       │ hit            │                 │
//!                 │                       │                ▼                 │
//!   Response      │                       │        ┌──────────────┐          │
//!   ◀─────────────┼───────────────────────┴────────│ pool + retry │◀─────────┼──── Target
//!                 │                                │  transport   │          │
//!                 │                                └──────────────┘          │
//!                 │  ┌────────────────────────────────────────────────────┐  │
//!                 │  │              Cross-Cutting Concerns                │  │
//!                 │  │  ┌─────────┐ ┌───────────┐ ┌──────────────────┐    │  │
//!                 │  │  │ config  │ │observa-   │ │    lifecycle     │    │  │
//!                 │  │  │         │ │ bility    │ │  stop signal     │    │  │
//!                 │  │  └─────────┘ └───────────┘ └──────────────────┘    │  │
//!                 │  └────────────────────────────────────────────────────┘  │
//!                 └──────────────────────────────────────────────────────────┘
//! ```
//!
//! [`pipeline::LoadTester`] drives the same pipeline from many workers.

pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod pool;
pub mod resilience;
pub mod security;
pub mod transport;

pub use config::ClientConfig;
pub use error::{Error, ErrorKind};
pub use lifecycle::Shutdown;
pub use pipeline::{RequestPipeline, RequestSpec};
