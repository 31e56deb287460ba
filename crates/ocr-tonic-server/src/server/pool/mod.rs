//! Concurrency dispatcher.
//!
//! - [`manager`] - [`WorkerPool`](manager::WorkerPool): bounded queue,
//!   submission and shutdown.
//! - [`worker`] - The per-worker receive loop.

pub mod manager;
pub mod worker;
