//! # Recognition Records
//!
//! A successful `Recognize` call returns a JSON array of [`RecognitionResult`]
//! records in `RecognizeResponse.json`, one per detected text region, in the
//! engine's reading order. The encoding is plain `serde_json`: UTF-8 with
//! non-ASCII text preserved as-is.
//!
//! This module also adds constructors and client-side helpers to the generated
//! [`RecognizeResponse`] message.

use crate::proto::RecognizeResponse;
use prost::Message;
use serde::{Deserialize, Serialize};
use tonic::Status;

/// Axis-aligned pixel rectangle enclosing a text region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub const fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub const fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &Self) -> Self {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        Self {
            left,
            top,
            width: self.right().max(other.right()) - left,
            height: self.bottom().max(other.bottom()) - top,
        }
    }
}

/// One recognized text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Engine confidence in `0.0..=100.0`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RecognizeResponse {
    /// A successful response carrying an already-serialized result array.
    pub fn recognized(json: String) -> Self {
        Self {
            success: true,
            json,
            error: String::new(),
        }
    }

    /// A failed response with a human-readable reason.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            json: String::new(),
            error: error.into(),
        }
    }

    /// Parses the `json` payload. Failed responses yield an empty list.
    pub fn results(&self) -> serde_json::Result<Vec<RecognitionResult>> {
        if !self.success && self.json.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&self.json)
    }

    /// Recovers the response attached to a failed `Recognize` status.
    ///
    /// Returns `None` when the status did not originate from the service
    /// handler (for example transport-level rejections).
    pub fn from_status(status: &Status) -> Option<Self> {
        if status.details().is_empty() {
            return None;
        }
        Self::decode(status.details()).ok()
    }
}
