//! Bounded worker pool for recognition requests.
//!
//! This module defines the [`WorkerPool`] struct, which owns a fixed number of
//! worker tasks fed from one bounded MPSC queue. The pool size bounds how many
//! recognitions run at once; the queue depth bounds how many more may wait.
//! Submitting to a full queue waits for space, so load never turns into
//! rejections.
//!
//! Shutdown is coordinated through a [`CancellationToken`]: cancelling it
//! abandons waiting callers and makes workers refuse queued work, after which
//! each worker is asked to stop and acknowledge.

use super::worker::{SharedReceiver, worker_loop};
use crate::server::{
    engine::SharedEngine,
    recognition::{processor::Recognition, request::WorkRequest},
};
use bytes::Bytes;
use core::time::Duration;
use ocr_tonic_core::Error;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    queue: mpsc::Sender<WorkRequest>,
    num_workers: usize,
    in_flight: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    /// Spawns `num_workers` worker tasks sharing `engine`, fed by a queue of
    /// `queue_depth` slots.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(engine: SharedEngine, num_workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));
        let shutdown_token = CancellationToken::new();

        for worker_id in 0..num_workers {
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&engine),
                shutdown_token.clone(),
            ));
        }

        Self {
            queue: tx,
            num_workers,
            in_flight: AtomicUsize::new(0),
            shutdown_token,
        }
    }

    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Requests submitted and not yet answered (queued or running).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Queues `image` for recognition and waits for the result.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if the pool is shut down before the
    ///   request completes.
    /// - [`Error::ChannelError`] if the queue or reply channel closes.
    /// - Any error produced by the request handler itself.
    pub async fn submit(&self, image: Bytes) -> Result<Recognition, Error> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let _guard = InFlight::enter(&self.in_flight);
        let (tx, rx) = oneshot::channel();

        let work = async {
            let work = WorkRequest::Recognize {
                image,
                response: tx,
            };
            if self.queue.send(work).await.is_err() {
                return Err(Error::ChannelError {
                    context: "work queue closed".to_string(),
                });
            }

            rx.await.unwrap_or_else(|_| {
                Err(Error::ChannelError {
                    context: "worker dropped the request".to_string(),
                })
            })
        };

        tokio::select! {
            biased;
            () = self.shutdown_token.cancelled() => Err(Error::ServiceShutdown),
            result = work => result,
        }
    }

    /// Abandons outstanding work without waiting for workers.
    ///
    /// Callers blocked in [`submit`](Self::submit) return
    /// [`Error::ServiceShutdown`] immediately. Recognitions already running
    /// continue in the background; their results are discarded.
    pub fn abandon(&self) {
        self.shutdown_token.cancel();
    }

    /// Shuts down all workers in the pool.
    ///
    /// - Cancels the shared [`CancellationToken`] to refuse further work.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker.
    /// - Waits up to `ack_timeout` in total for the acknowledgements. A worker
    ///   stuck in a long recognition does not acknowledge and is left behind.
    pub async fn shutdown(&self, ack_timeout: Duration) {
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();

        let stop_workers = async {
            let mut acks = Vec::with_capacity(self.num_workers);
            for i in 0..self.num_workers {
                let (tx, rx) = oneshot::channel();
                if let Err(e) = self.queue.send(WorkRequest::Shutdown { response: tx }).await {
                    tracing::error!("Failed to send shutdown to worker {i}: {e}");
                } else {
                    acks.push(rx);
                }
            }
            futures::future::join_all(acks).await.into_iter().filter(Result::is_ok).count()
        };

        match timeout(ack_timeout, stop_workers).await {
            Ok(stopped) => {
                tracing::info!(stopped, "Worker pool shutdown complete");
            }
            Err(_) => {
                tracing::warn!(
                    in_flight = self.in_flight(),
                    "Worker pool shutdown timed out; leaving busy workers behind"
                );
            }
        }
    }
}

/// Counts a request as in flight for as long as it is alive.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
