//! Cooperative cancellation helpers.
//!
//! Public chassis entry points accept a [`CancellationToken`]; store and port
//! calls are raced against it so a durable backend that suspends on I/O still
//! observes cancellation even if the port itself ignores the token.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ChassisError;

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, ChassisError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChassisError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Sleep for `duration`; returns `false` if cancelled before it elapsed.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
