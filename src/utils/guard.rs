//! Deadline and cancellation wrapper for every call that goes to the server.
//!
//! A hung network round-trip would otherwise block its caller forever, so each
//! store operation runs through [`CallGuard::run`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::time::Sleep;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::utils::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct CallGuard {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl CallGuard {
    pub fn new(timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs `fut` until it completes, the deadline passes, or the token is cancelled.
    pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let bounded = async {
            match self.timeout {
                Some(after) => tokio::time::timeout(after, fut)
                    .await
                    .map_err(|_| StoreError::TimedOut { operation, after })?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled { operation }),
            result = bounded => result,
        }
    }

    /// Applies the same rules to each item of `stream`: the deadline restarts for
    /// every item, and cancellation ends the stream with a final `Cancelled` error.
    pub fn guard_stream<S>(&self, operation: &'static str, stream: S) -> GuardedStream<S> {
        GuardedStream {
            inner: stream,
            operation,
            timeout: self.timeout,
            cancelled: Box::pin(self.cancel.clone().cancelled_owned()),
            deadline: None,
            finished: false,
        }
    }
}

/// Stream returned by [`CallGuard::guard_stream`].
pub struct GuardedStream<S> {
    inner: S,
    operation: &'static str,
    timeout: Option<Duration>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    // Armed while waiting for the next item
    deadline: Option<Pin<Box<Sleep>>>,
    finished: bool,
}

impl<S, T> Stream for GuardedStream<S>
where
    S: Stream<Item = Result<T, StoreError>> + Unpin,
{
    type Item = Result<T, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        let operation = this.operation;
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finished = true;
            return Poll::Ready(Some(Err(StoreError::Cancelled { operation })));
        }

        if let Poll::Ready(item) = Pin::new(&mut this.inner).poll_next(cx) {
            this.deadline = None;
            this.finished = item.is_none();
            return Poll::Ready(item);
        }

        if let Some(after) = this.timeout {
            let deadline = this
                .deadline
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(after)));
            if deadline.as_mut().poll(cx).is_ready() {
                this.deadline = None;
                this.finished = true;
                return Poll::Ready(Some(Err(StoreError::TimedOut { operation, after })));
            }
        }

        Poll::Pending
    }
}

impl<S> std::fmt::Debug for GuardedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedStream")
            .field("operation", &self.operation)
            .field("timeout", &self.timeout)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
