//! Per-request recognition pipeline.
//!
//! - [`decode`] - Encoded bytes to [`PixelGrid`](crate::server::engine::PixelGrid).
//! - [`processor`] - The request handler: validate, decode, recognize,
//!   serialize.
//! - [`request`] - Messages exchanged with the worker pool.

pub mod decode;
pub mod processor;
pub mod request;
