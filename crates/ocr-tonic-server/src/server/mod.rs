//! Server internals.
//!
//! - [`config`] - Command-line and environment configuration.
//! - [`engine`] - Recognition engine seam and the Tesseract engine.
//! - [`recognition`] - Decoding and the per-request handler.
//! - [`pool`] - Bounded worker pool.
//! - [`service`] - gRPC `Recognize` endpoint.
//! - [`incoming`] - Listener wrapper that stops accepting on drain.
//! - [`lifecycle`] - Startup, warmup, serving and graceful shutdown.
//! - [`signals`] - SIGINT/SIGTERM forwarding.
//! - [`telemetry`] - Logging and optional OpenTelemetry export.

pub mod config;
pub mod engine;
pub mod error;
pub mod incoming;
pub mod lifecycle;
pub mod pool;
pub mod recognition;
pub mod service;
pub mod signals;
pub mod telemetry;
