use super::processor::Recognition;
use bytes::Bytes;
use ocr_tonic_core::Error;
use tokio::sync::oneshot;

/// A unit of work sent from the RPC layer to the worker pool.
#[derive(Debug)]
pub enum WorkRequest {
    /// Decode and recognize one image, replying on `response`.
    Recognize {
        image: Bytes,
        response: oneshot::Sender<Result<Recognition, Error>>,
    },
    /// Stop the receiving worker and acknowledge on `response`.
    Shutdown { response: oneshot::Sender<()> },
}
