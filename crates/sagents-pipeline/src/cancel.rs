//! Cooperative cancellation helpers.

use tokio_util::sync::CancellationToken;

/// Alias used throughout the runtime for run cancellation.
pub type RunCancellationToken = CancellationToken;

/// Result of awaiting a future that may be cancelled out from under us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelAware<T> {
    Value(T),
    Cancelled,
}

/// Await `fut`, resolving early if the token fires first.
pub async fn await_or_cancel<T, F>(token: &RunCancellationToken, fut: F) -> CancelAware<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        _ = token.cancelled() => CancelAware::Cancelled,
        value = fut => CancelAware::Value(value),
    }
}
