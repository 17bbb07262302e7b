//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Stop (shutdown.rs):
//!     trigger() → every StopListener wakes → workers cancel in-flight work
//!
//! Signals (signals.rs):
//!     SIGINT → trigger()
//! ```
//!
//! # Design Decisions
//! - Level-triggered signal: late subscribers still see a stop
//! - Cancellation is cooperative via `select!`; RAII guards release resources

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, StopListener};
