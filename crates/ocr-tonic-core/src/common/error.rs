//! Error types for the recognition service.
//!
//! This module defines the central [`Error`] enum covering every way a single
//! `Recognize` call can fail. It implements `From<Error>` for `tonic::Status`
//! so handlers can return it directly; the resulting status carries the
//! matching gRPC code and a fully-formed [`RecognizeResponse`] in its details,
//! which callers recover with [`RecognizeResponse::from_status`].
//!
//! ## Error Cases
//! - `EmptyImage`: The request carried no image bytes.
//! - `UndecodableImage`: The bytes are not an image the decoder understands.
//! - `Recognition`: The recognition engine failed while processing the image.
//! - `ChannelError`: Internal communication failure between the RPC task and
//!   the worker pool.
//! - `ServiceShutdown`: A request arrived while the service was draining.

use crate::proto::RecognizeResponse;
use prost::Message;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used for logging and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller-correctable input problem.
    Validation,
    /// Failure inside the recognition engine.
    Engine,
    /// Failure in the service plumbing itself.
    Internal,
    /// The service refused work because it is shutting down.
    Shutdown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Engine => "engine",
            Self::Internal => "internal",
            Self::Shutdown => "shutdown",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for a single recognition request.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The request image was zero bytes long.
    #[error("Empty image")]
    EmptyImage,

    /// The request bytes could not be decoded into a pixel grid.
    #[error("Unable to decode image: {reason}")]
    UndecodableImage { reason: String },

    /// The recognition engine failed.
    #[error("Recognition failed: {message}")]
    Recognition { message: String },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyImage | Self::UndecodableImage { .. } => ErrorKind::Validation,
            Self::Recognition { .. } => ErrorKind::Engine,
            Self::ChannelError { .. } => ErrorKind::Internal,
            Self::ServiceShutdown => ErrorKind::Shutdown,
        }
    }

    pub const fn code(&self) -> Code {
        match self.kind() {
            ErrorKind::Validation => Code::InvalidArgument,
            ErrorKind::Engine | ErrorKind::Internal => Code::Internal,
            ErrorKind::Shutdown => Code::Unavailable,
        }
    }

    /// The `error` text placed in the [`RecognizeResponse`] for this failure.
    ///
    /// Validation failures use fixed strings that callers may match on. Engine
    /// failures surface the engine's own message.
    pub fn response_message(&self) -> String {
        match self {
            Self::EmptyImage => "Empty image".to_string(),
            Self::UndecodableImage { .. } => "Unable to decode image".to_string(),
            Self::Recognition { message } => message.clone(),
            Self::ChannelError { .. } | Self::ServiceShutdown => self.to_string(),
        }
    }

    /// Builds the failed [`RecognizeResponse`] describing this error.
    pub fn response(&self) -> RecognizeResponse {
        RecognizeResponse::failed(self.response_message())
    }

    fn status_message(&self) -> String {
        match self {
            Self::EmptyImage => "Image field cannot be empty".to_string(),
            Self::UndecodableImage { reason } => format!("Image decode error: {reason}"),
            Self::Recognition { .. } => "OCR processing error".to_string(),
            Self::ChannelError { context } => format!("Channel error: {context}"),
            Self::ServiceShutdown => "Service is shutting down".to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let details = err.response().encode_to_vec();
        Status::with_details(err.code(), err.status_message(), details.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_invalid_argument() {
        let empty = Status::from(Error::EmptyImage);
        assert_eq!(empty.code(), Code::InvalidArgument);
        assert_eq!(empty.message(), "Image field cannot be empty");

        let undecodable = Status::from(Error::UndecodableImage {
            reason: "unknown format".to_string(),
        });
        assert_eq!(undecodable.code(), Code::InvalidArgument);
        assert!(undecodable.message().contains("unknown format"));
    }

    #[test]
    fn engine_and_internal_errors_map_to_internal() {
        let engine = Error::Recognition {
            message: "out of memory".to_string(),
        };
        assert_eq!(engine.kind(), ErrorKind::Engine);
        assert_eq!(Status::from(engine).code(), Code::Internal);

        let channel = Error::ChannelError {
            context: "closed".to_string(),
        };
        assert_eq!(channel.kind(), ErrorKind::Internal);
        assert_eq!(Status::from(channel).code(), Code::Internal);
    }

    #[test]
    fn shutdown_maps_to_unavailable() {
        assert_eq!(Status::from(Error::ServiceShutdown).code(), Code::Unavailable);
    }

    #[test]
    fn response_messages_are_fixed_for_validation() {
        assert_eq!(Error::EmptyImage.response().error, "Empty image");
        let undecodable = Error::UndecodableImage {
            reason: "truncated".to_string(),
        };
        assert_eq!(undecodable.response().error, "Unable to decode image");
    }

    #[test]
    fn engine_message_is_surfaced_verbatim() {
        let response = Error::Recognition {
            message: "model crashed".to_string(),
        }
        .response();
        assert!(!response.success);
        assert!(response.json.is_empty());
        assert_eq!(response.error, "model crashed");
    }

    #[test]
    fn status_details_carry_the_response() {
        let status = Status::from(Error::EmptyImage);
        let response = RecognizeResponse::from_status(&status).unwrap();
        assert_eq!(response, Error::EmptyImage.response());
    }
}
