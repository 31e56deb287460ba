//! Process-level failures.
//!
//! Per-request failures live in [`ocr_tonic_core::Error`] and never leave the
//! request handler. The errors here end the process: [`StartupError`] before
//! the endpoint is bound, [`ServeError`] from the serve loop itself.

use crate::server::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The engine could not be constructed.
    #[error("failed to construct recognition engine: {0}")]
    Construct(#[source] EngineError),

    /// The warmup recognition on a blank grid failed.
    #[error("recognition engine warmup failed: {0}")]
    Warmup(#[source] EngineError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to build reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}
