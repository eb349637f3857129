//! Async timeout helpers.
//!
//! The transport core never times out on its own; these helpers exist for the
//! bounded waits a caller opts into, such as [`Acceptor::wait_pending`].
//!
//! [`Acceptor::wait_pending`]: crate::transport::acceptor::Acceptor::wait_pending

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound for waits on an expected event (matches the 4 s watchdog peers use)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Default time allowed for an acceptor to stop after shutdown is requested
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a fallible future, failing with [`ProtocolError::Timeout`] if it does not
/// complete within `duration`.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
