use super::decode::decode;
use crate::server::engine::RecognitionEngine;
use ocr_tonic_core::{Error, proto::RecognizeResponse};
use std::time::Instant;

/// A successful recognition, ready to be returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub response: RecognizeResponse,
    /// Number of text regions in the payload.
    pub regions: usize,
}

/// Handles a single `Recognize` request on a worker.
///
/// Runs on the blocking thread pool: both decoding and recognition may take
/// arbitrarily long. Every failure is returned as an [`Error`] and never
/// escapes as a panic of this function's own making; panics inside the engine
/// are caught by the caller.
///
/// # Steps
///
/// 1. Reject empty input ([`Error::EmptyImage`]) without touching the decoder.
/// 2. Decode to a pixel grid ([`Error::UndecodableImage`] on failure).
/// 3. Run the engine ([`Error::Recognition`] on failure) and serialize its
///    results, in engine order, as a JSON array.
///
/// Each branch emits one log event. Validation failures are logged at `info`
/// since they are the caller's fault.
pub fn handle_recognize(
    worker_id: usize,
    engine: &dyn RecognitionEngine,
    image: &[u8],
) -> Result<Recognition, Error> {
    let start = Instant::now();

    if image.is_empty() {
        let err = Error::EmptyImage;
        tracing::info!(worker_id, kind = %err.kind(), "Rejected request: empty image");
        return Err(err);
    }

    let grid = match decode(image) {
        Ok(grid) => grid,
        Err(e) => {
            let err = Error::UndecodableImage {
                reason: e.to_string(),
            };
            tracing::info!(
                worker_id,
                kind = %err.kind(),
                bytes = image.len(),
                error = %e,
                "Rejected request: unable to decode image"
            );
            return Err(err);
        }
    };

    let (width, height) = (grid.width(), grid.height());

    let results = engine.recognize(&grid).map_err(|e| {
        tracing::error!(
            worker_id,
            width,
            height,
            error = %e,
            error.debug = ?e,
            "Recognition failed"
        );
        Error::Recognition {
            message: e.to_string(),
        }
    })?;

    let json = serde_json::to_string(&results).map_err(|e| {
        tracing::error!(worker_id, error = %e, "Failed to serialize recognition results");
        Error::Recognition {
            message: format!("failed to serialize results: {e}"),
        }
    })?;

    tracing::debug!(
        worker_id,
        width,
        height,
        regions = results.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Recognition complete"
    );

    Ok(Recognition {
        response: RecognizeResponse::recognized(json),
        regions: results.len(),
    })
}
