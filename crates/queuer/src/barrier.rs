use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    future::{join_all, BoxFuture},
    FutureExt,
};

/// Completes once every captured operation has completed.
///
/// Outcomes are thrown away: an operation that failed counts as done just like one that
/// succeeded, so the barrier itself can never fail. The set of operations is fixed when
/// the barrier is built. An empty barrier is ready on first poll.
pub struct JoinBarrier {
    captured: usize,
    inner: BoxFuture<'static, ()>,
}

impl JoinBarrier {
    pub fn new<I>(operations: I) -> Self
    where
        I: IntoIterator,
        I::Item: Future + Send + 'static,
    {
        let operations: Vec<BoxFuture<'static, ()>> = operations
            .into_iter()
            .map(|op| op.map(drop).boxed())
            .collect();
        let captured = operations.len();
        Self {
            captured,
            inner: join_all(operations).map(drop).boxed(),
        }
    }

    /// Number of operations the barrier waits on.
    pub fn len(&self) -> usize {
        self.captured
    }

    pub fn is_empty(&self) -> bool {
        self.captured == 0
    }
}

impl Future for JoinBarrier {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.poll_unpin(cx)
    }
}

impl std::fmt::Debug for JoinBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinBarrier").field("captured", &self.captured).finish()
    }
}
