//! Shared protocol surface for the OCR service.
//!
//! - [`proto`] - Generated `ocr.OcrService` bindings and the descriptor set.
//! - [`types`] - Recognition records carried in `RecognizeResponse.json`.
//! - [`error`] - Request error taxonomy and its gRPC status mapping.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{BoundingBox, RecognitionResult};

/// gRPC service and message definitions generated from `proto/ocr.proto`.
pub mod proto {
    tonic::include_proto!("ocr");

    /// Encoded file descriptor set for `ocr.proto`, served by gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("ocr_descriptor");
}
