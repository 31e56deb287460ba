//! Connection stream that lets go of the listener once draining starts.
//!
//! The transport keeps its incoming stream alive until every connection has
//! drained, and an open listener keeps completing TCP handshakes for callers
//! that will never be served. [`StopAccepting`] drops the wrapped listener the
//! moment `stop` is cancelled, so the kernel refuses new connects at once.

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

pub struct StopAccepting<S> {
    inner: Option<Pin<Box<S>>>,
    stop: Pin<Box<WaitForCancellationFutureOwned>>,
    released: CancellationToken,
}

impl<S> StopAccepting<S> {
    pub fn new(inner: S, stop: CancellationToken) -> Self {
        Self {
            inner: Some(Box::pin(inner)),
            stop: Box::pin(stop.cancelled_owned()),
            released: CancellationToken::new(),
        }
    }

    /// Cancelled once the wrapped listener has been dropped.
    pub fn released(&self) -> CancellationToken {
        self.released.clone()
    }
}

impl<S: Stream> Stream for StopAccepting<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.inner.is_some() && this.stop.as_mut().poll(cx).is_ready() {
            this.inner = None;
            this.released.cancel();
            tracing::debug!("Listener released; refusing new connections");
        }

        match this.inner.as_mut() {
            Some(inner) => inner.as_mut().poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}
