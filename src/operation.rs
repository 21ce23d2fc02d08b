//! One-shot handles for pending backend calls.
//!
//! Every public operation that touches a backend returns an [`AsyncOperation`]. The
//! work runs on the tokio runtime (or its blocking pool, for blocking drivers) and
//! the outcome is written exactly once into a oneshot channel. Awaiting the handle
//! yields that outcome; dropping the handle detaches it and the backend call still
//! runs to completion.
//!
//! Operations must be created from within a tokio runtime.

use crate::error::{DbError, DbResult};
use futures_util::future::{FutureExt, Shared};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A pending or completed unit of work against a backend.
///
/// Resolves to `Ok(value)` or `Err(DbError)`; operations that can find nothing
/// resolve to `Ok(None)` rather than an error.
#[must_use = "an AsyncOperation carries the result or error of a backend call"]
#[derive(Debug)]
pub struct AsyncOperation<T> {
    receiver: oneshot::Receiver<DbResult<T>>,
}

impl<T: Send + 'static> AsyncOperation<T> {
    /// Run an async driver call on the runtime's worker threads.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = DbResult<T>> + Send + 'static,
    {
        let (operation, completer) = Self::pending();
        tokio::spawn(async move {
            completer.complete(future.await);
        });
        operation
    }

    /// Run a blocking driver call on the runtime's blocking pool.
    pub fn spawn_blocking<F>(call: F) -> Self
    where
        F: FnOnce() -> DbResult<T> + Send + 'static,
    {
        let (operation, completer) = Self::pending();
        tokio::task::spawn_blocking(move || {
            completer.complete(call());
        });
        operation
    }

    /// Create an operation that is completed later through its [`Completer`].
    pub fn pending() -> (Self, Completer<T>) {
        let (sender, receiver) = oneshot::channel();
        (Self { receiver }, Completer { sender })
    }

    /// Create an operation that has already resolved.
    pub fn ready(result: DbResult<T>) -> Self {
        let (operation, completer) = Self::pending();
        completer.complete(result);
        operation
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncOperation<T> {
    /// Convert into a cloneable handle that any number of callers can await.
    pub fn shared(self) -> SharedOperation<T> {
        let future: SharedFuture<T> =
            Box::pin(async move { self.await.map_err(Arc::new) });
        SharedOperation {
            inner: future.shared(),
        }
    }
}

impl<T> Future for AsyncOperation<T> {
    type Output = DbResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without a value: the task panicked or the runtime shut down
            Poll::Ready(Err(_)) => Poll::Ready(Err(DbError::internal(
                "Operation was abandoned before it completed",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Write side of an [`AsyncOperation`]. Consumed on completion, so it can only
/// resolve once.
#[derive(Debug)]
pub struct Completer<T> {
    sender: oneshot::Sender<DbResult<T>>,
}

impl<T> Completer<T> {
    pub fn complete(self, result: DbResult<T>) {
        // Receiver gone means the caller stopped listening; nothing to deliver
        let _ = self.sender.send(result);
    }
}

type SharedFuture<T> = Pin<Box<dyn Future<Output = Result<T, Arc<DbError>>> + Send>>;

/// Read-many view of an [`AsyncOperation`].
#[derive(Clone)]
pub struct SharedOperation<T: Clone> {
    inner: Shared<SharedFuture<T>>,
}

impl<T: Clone> SharedOperation<T> {
    /// The resolved value, if the operation has already completed and been polled.
    pub fn peek(&self) -> Option<&Result<T, Arc<DbError>>> {
        self.inner.peek()
    }
}

impl<T: Clone> Future for SharedOperation<T> {
    type Output = Result<T, Arc<DbError>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl<T: Clone> std::fmt::Debug for SharedOperation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedOperation")
            .field("resolved", &self.inner.peek().is_some())
            .finish()
    }
}
