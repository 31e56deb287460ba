//! gRPC service implementation.
//!
//! This module contains the client-facing `Recognize` handler. All
//! recognition work is delegated to the worker pool; the handler only gates,
//! dispatches and reports.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`RecognitionService`).

pub mod handler;
