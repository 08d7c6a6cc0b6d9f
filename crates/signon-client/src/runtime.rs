//! Task spawning and cooperative cancellation.
//!
//! Registration requests outlive the operation that triggered them, so the
//! readiness gate runs them as background tasks through a [`TaskSpawner`].

use crate::errors::{Result, SignonError};
use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::watch;

/// Task spawning contract for runtime implementations.
pub trait TaskSpawner: Send + Sync {
    /// Spawn a background task.
    fn spawn(&self, fut: BoxFuture<'static, ()>);
}

/// Spawner backed by a Tokio runtime handle.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Spawn onto the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawn onto the runtime of the calling context, if there is one.
    pub fn try_current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| SignonError::runtime(format!("no tokio runtime available: {e}")))
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        self.handle.spawn(fut);
    }
}

/// Cooperative cancellation token.
///
/// Clones share the same state. Once cancelled a token stays cancelled.
#[derive(Debug, Clone)]
pub struct Cancellable {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl Cancellable {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Non-blocking cancellation check.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run `fut` unless this token is cancelled first.
    ///
    /// A cancelled call resolves with [`SignonError::Cancelled`]; the
    /// operation itself is dropped, the handle it ran against is untouched.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(SignonError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SignonError::Cancelled),
            result = fut => result,
        }
    }
}

impl Default for Cancellable {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive `fut` to completion on the calling thread.
///
/// Backs the `_blocking` convenience wrappers. Registration tasks still run
/// on the client's spawner, so this must be called from outside the runtime
/// that spawner feeds (never from within an async task or a continuation).
pub fn block_on<F: Future>(fut: F) -> F::Output {
    futures::executor::block_on(fut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let token = Cancellable::new();
        let result = token.run(async { Ok::<_, SignonError>(5) }).await;
        assert_eq!(result, Ok(5));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_pending_future() {
        let token = Cancellable::new();
        let clone = token.clone();
        let pending = futures::future::pending::<Result<u32>>();

        let handle = tokio::spawn(async move { clone.run(pending).await });
        tokio::task::yield_now().await;
        token.cancel();

        assert_eq!(handle.await.unwrap(), Err(SignonError::Cancelled));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_token_short_circuits() {
        let token = Cancellable::new();
        token.cancel();
        let result = token.run(async { Ok::<_, SignonError>(1) }).await;
        assert_eq!(result, Err(SignonError::Cancelled));
    }
}
