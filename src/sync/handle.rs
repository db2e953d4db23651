use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::{Result, StashError};
use crate::sync::SyncError;

/// A spawned, cancelable fetch with exactly one terminal outcome.
///
/// Cancelling drops the wrapped future at its next suspension point. Work
/// that must not be interrupted (a store write) belongs after
/// [`outcome`](Self::outcome) returns, not inside the handle.
pub struct FetchHandle<T> {
    cancel: CancellationToken,
    join: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> FetchHandle<T> {
    pub fn spawn<F>(cancel: CancellationToken, fetch: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(SyncError::Canceled.into()),
                result = fetch => result,
            }
        });
        Self { cancel, join }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the terminal state. A fetch that completed in the same instant
    /// it was canceled still reports `Canceled`.
    pub async fn outcome(self) -> Result<T> {
        let result = match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(SyncError::Canceled.into()),
            Err(e) => Err(StashError::Other(format!("fetch task failed: {}", e))),
        };
        if self.cancel.is_cancelled() {
            return Err(SyncError::Canceled.into());
        }
        result
    }
}
