//! gRPC service implementation for text recognition.
//!
//! This module defines [`RecognitionService`], the concrete implementation of
//! the [`OcrService`] gRPC service defined in the protobuf schema. It exposes a
//! single unary `Recognize` endpoint.
//!
//! ## Responsibilities
//!
//! - Refuse new work once the service has left the serving phase.
//! - Hand each request to the shared [`WorkerPool`] and await its answer.
//! - Translate failures into gRPC statuses that carry a `RecognizeResponse`.
//! - Record per-request telemetry.

use crate::server::{
    lifecycle::{Phase, PhaseCell},
    pool::manager::WorkerPool,
    telemetry::{
        decrement_requests_inflight, increment_request_errors, increment_requests,
        increment_requests_inflight, record_recognition_duration, record_regions_recognized,
    },
};
use ocr_tonic_core::{
    Error, ErrorKind,
    proto::{RecognizeRequest, RecognizeResponse, ocr_service_server::OcrService},
};
use std::{sync::Arc, time::Instant};
use tonic::{Request, Response, Status};

/// Unary gRPC front end for the recognition worker pool.
///
/// Cloning is cheap; every clone shares the same pool and phase.
#[derive(Clone)]
pub struct RecognitionService {
    pool: Arc<WorkerPool>,
    phase: Arc<PhaseCell>,
}

impl RecognitionService {
    pub const fn new(pool: Arc<WorkerPool>, phase: Arc<PhaseCell>) -> Self {
        Self { pool, phase }
    }
}

#[tonic::async_trait]
impl OcrService for RecognitionService {
    /// Recognizes the text in one encoded image.
    ///
    /// Success returns `OK` with a `RecognizeResponse` whose `json` holds the
    /// result array. Failures return a status whose details carry the failed
    /// `RecognizeResponse`:
    ///
    /// - `INVALID_ARGUMENT` for empty or undecodable images.
    /// - `INTERNAL` for engine failures.
    /// - `UNAVAILABLE` once shutdown has begun.
    #[tracing::instrument(skip_all, fields(image_bytes = req.get_ref().image.len()))]
    async fn recognize(
        &self,
        req: Request<RecognizeRequest>,
    ) -> Result<Response<RecognizeResponse>, Status> {
        let start = Instant::now();
        increment_requests();

        if self.phase.get() != Phase::Serving {
            let err = Error::ServiceShutdown;
            tracing::debug!(phase = %self.phase.get(), "Refusing request");
            increment_request_errors(err.kind());
            return Err(err.into());
        }

        let result = {
            let _inflight = InflightGauge::enter();
            self.pool.submit(req.into_inner().image).await
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        record_recognition_duration(elapsed_ms);

        match result {
            Ok(recognition) => {
                record_regions_recognized(recognition.regions as u64);
                Ok(Response::new(recognition.response))
            }
            Err(err) => {
                increment_request_errors(err.kind());
                if err.kind() == ErrorKind::Shutdown {
                    tracing::warn!(elapsed_ms, "Request abandoned by shutdown");
                }
                Err(err.into())
            }
        }
    }
}

/// Keeps the in-flight gauge balanced when a caller disconnects mid-request.
struct InflightGauge;

impl InflightGauge {
    fn enter() -> Self {
        increment_requests_inflight();
        Self
    }
}

impl Drop for InflightGauge {
    fn drop(&mut self) {
        decrement_requests_inflight();
    }
}
