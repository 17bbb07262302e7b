//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the wrapped future is dropped on expiry,
//!   so RAII guards it holds (pool permits, breaker permits) are released
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Run `fut` with a deadline, mapping expiry to `Error::Timeout`.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(deadline)),
    }
}
