//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → ssrf.rs (parse, scheme allow-list, blocklist, resolve, range checks)
//!     → rate_limit.rs (per-destination or global admission)
//!     → Pass to circuit breaker / pool
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any validation failure
//! - No trust in caller-supplied URLs or DNS answers
//! - Rejections are typed errors, never silent drops

pub mod rate_limit;
pub mod ssrf;

pub use rate_limit::{Admission, RateLimitStats, RateLimiter};
pub use ssrf::{AddressPolicy, Destination, Resolve, SystemResolver, TargetValidator, ValidatedTarget};
