//! Recognition engine seam.
//!
//! The service treats the recognition model as a black box behind the
//! [`RecognitionEngine`] trait: a pixel grid goes in, an ordered list of
//! [`RecognitionResult`]s comes out. A single engine instance is shared by
//! every worker, so the trait requires `Send + Sync` and takes `&self`.
//!
//! Engines that keep mutable per-call state implement [`ExclusiveEngine`]
//! instead and are wrapped in [`Serialized`], which admits one call at a time.
//!
//! ## Implementations
//!
//! - [`TesseractEngine`] - Runs the `tesseract` CLI once per call. Calls share
//!   no state, so it is safe for concurrent use.
//! - `LibraryEngine` - Calls libtesseract in-process through `leptess`, one
//!   API handle per thread. Needs the `leptess` feature.
//! - [`Serialized`] - Mutex adapter for non-reentrant engines.

#[cfg(feature = "leptess")]
pub mod library;
pub mod serialized;
pub mod tesseract;

#[cfg(feature = "leptess")]
pub use library::LibraryEngine;
pub use serialized::Serialized;
pub use tesseract::{TesseractConfig, TesseractEngine};

use core::{fmt, str::FromStr};
use image::{Rgb, RgbImage};
use ocr_tonic_core::RecognitionResult;
use std::{io, process::ExitStatus, sync::Arc};

/// The engine handle shared by the worker pool.
pub type SharedEngine = Arc<dyn RecognitionEngine>;

/// Wraps a thread-safe engine into a [`SharedEngine`].
pub fn share<E: RecognitionEngine>(engine: E) -> SharedEngine {
    Arc::new(engine)
}

/// How the Tesseract engine is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    /// Spawn the `tesseract` executable for every call.
    #[cfg_attr(not(feature = "leptess"), default)]
    Cli,
    /// Call libtesseract in-process.
    #[cfg_attr(feature = "leptess", default)]
    Library,
}

/// Builds the configured Tesseract engine.
///
/// `instances` sizes the in-process backend and should match the worker
/// count. With `serialize` set, at most one recognition runs at a time,
/// whatever the worker count.
pub fn build(
    config: &TesseractConfig,
    serialize: bool,
    instances: usize,
) -> Result<SharedEngine, EngineError> {
    tracing::debug!(
        backend = ?config.backend,
        instances,
        serialized = serialize,
        "Building recognition engine"
    );

    match config.backend {
        Backend::Cli => {
            let engine = TesseractEngine::new(config.clone())?;
            tracing::info!(
                languages = engine.languages(),
                serialized = serialize,
                "Using tesseract executable"
            );
            if serialize {
                Ok(share(Serialized::new(engine)))
            } else {
                Ok(share(engine))
            }
        }
        #[cfg(feature = "leptess")]
        Backend::Library => {
            let engine = LibraryEngine::new(config, if serialize { 1 } else { instances })?;
            tracing::info!(
                languages = %config.languages,
                instances = engine.instances(),
                "Using libtesseract"
            );
            Ok(share(engine))
        }
        #[cfg(not(feature = "leptess"))]
        Backend::Library => Err(EngineError::Backend(
            "the library backend needs a build with the `leptess` feature".to_string(),
        )),
    }
}

/// A decoded RGB image owned by exactly one request.
#[derive(Debug, Clone)]
pub struct PixelGrid {
    image: RgbImage,
}

impl PixelGrid {
    pub const fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// An all-black grid, used for warmup.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb([0, 0, 0])))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub const fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_rgb(self) -> RgbImage {
        self.image
    }
}

/// A text recognizer that may be invoked from several workers at once.
pub trait RecognitionEngine: Send + Sync + 'static {
    /// Recognizes every text region in `grid`.
    ///
    /// This call blocks for the full duration of inference.
    fn recognize(&self, grid: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError>;
}

/// A text recognizer that needs exclusive access for each call.
///
/// Wrap in [`Serialized`] to share it across workers.
pub trait ExclusiveEngine: Send + 'static {
    fn recognize(&mut self, grid: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError>;
}

/// Compute device requested for the engine.
///
/// The value is parsed from configuration and handed to engine construction
/// as-is; each engine decides which devices it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Gpu {
        ordinal: u32,
    },
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu { ordinal } => write!(f, "gpu:{ordinal}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device `{0}`; expected `cpu`, `gpu` or `gpu:<ordinal>`")]
pub struct ParseDeviceError(String);

impl FromStr for Device {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        match raw.as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu { ordinal: 0 }),
            other => other
                .strip_prefix("gpu:")
                .or_else(|| other.strip_prefix("cuda:"))
                .and_then(|ordinal| ordinal.parse().ok())
                .map(|ordinal| Self::Gpu { ordinal })
                .ok_or_else(|| ParseDeviceError(s.to_string())),
        }
    }
}

/// Failures raised by an engine, during construction or recognition.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("device `{0}` is not supported by this engine")]
    UnsupportedDevice(Device),

    #[error("language `{language}` is not installed")]
    MissingLanguage { language: String },

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("engine exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("failed to encode pixel grid: {0}")]
    Encode(#[from] image::ImageError),

    #[error("malformed engine output: {reason}")]
    MalformedOutput { reason: String },

    /// Free-form failure reported by an engine implementation.
    #[error("{0}")]
    Backend(String),
}
