use crate::server::{
    engine::SharedEngine,
    recognition::{processor::handle_recognize, request::WorkRequest},
};
use ocr_tonic_core::Error;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// The queue end shared by all workers.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<WorkRequest>>>;

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// All workers pull from the same queue, so an idle worker always picks up
/// the oldest waiting request. A worker handles one request at a time and
/// runs it on the blocking thread pool, which keeps the number of concurrent
/// recognitions equal to the number of workers.
///
/// # Arguments
///
/// - `worker_id`: Identifier used in logs.
/// - `rx`: Shared receiving end of the work queue.
/// - `engine`: The engine shared by every worker.
/// - `shutdown_token`: Once cancelled, queued requests are answered with
///   [`Error::ServiceShutdown`] instead of being processed.
///
/// # Request Types
///
/// - [`WorkRequest::Recognize`] - Runs [`handle_recognize`] and replies.
/// - [`WorkRequest::Shutdown`] - Acknowledges and stops the worker.
pub async fn worker_loop(
    worker_id: usize,
    rx: SharedReceiver,
    engine: SharedEngine,
    shutdown_token: CancellationToken,
) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        // The lock is held only while waiting for the next message.
        let work = rx.lock().await.recv().await;
        let Some(work) = work else {
            break;
        };

        match work {
            WorkRequest::Recognize { image, response } => {
                if shutdown_token.is_cancelled() {
                    let _ = response.send(Err(Error::ServiceShutdown));
                    continue;
                }

                if response.is_closed() {
                    tracing::debug!("Worker {worker_id} skipping request from a departed caller");
                    continue;
                }

                let engine = Arc::clone(&engine);
                let result = tokio::task::spawn_blocking(move || {
                    handle_recognize(worker_id, engine.as_ref(), &image)
                })
                .await
                .unwrap_or_else(|e| {
                    let message = panic_message(e);
                    tracing::error!(worker_id, error = %message, "Recognition task aborted");
                    Err(Error::Recognition { message })
                });

                if response.send(result).is_err() {
                    tracing::debug!("Worker {worker_id} finished after the caller went away");
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("recognition task failed: {err}");
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("recognition engine panicked: {detail}")
}
