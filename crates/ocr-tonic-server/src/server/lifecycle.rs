//! Server lifecycle: startup, warmup, serving and graceful shutdown.
//!
//! [`Lifecycle`] owns the engine, the worker pool and the listening endpoint
//! and moves through the phases
//!
//! ```text
//! Starting -> WarmingUp -> Serving -> Draining -> Stopped
//! ```
//!
//! - **Starting**: the engine is constructed. Failure aborts startup.
//! - **WarmingUp**: one recognition on a blank 100x100 grid forces lazy
//!   initialization before the first real request. Failure aborts startup.
//! - **Serving**: the worker pool runs and connections are accepted.
//! - **Draining**: entered on the first [`ShutdownHandle::trigger`]. New
//!   requests are refused, health reports `NOT_SERVING`, the listener is
//!   closed so new connects fail at once and in-flight requests get the grace period to finish.
//!   Anything still running at the deadline is abandoned.
//! - **Stopped**: the pool is shut down and [`Lifecycle::serve_with_incoming`]
//!   returns.

use crate::server::{
    config::ServerConfig,
    engine::{EngineError, PixelGrid, SharedEngine},
    error::{ServeError, StartupError},
    incoming::StopAccepting,
    pool::manager::WorkerPool,
    service::handler::RecognitionService,
};
use core::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::Duration,
};
use futures::Stream;
use ocr_tonic_core::proto::{FILE_DESCRIPTOR_SET, ocr_service_server::OcrServiceServer};
use std::{sync::Arc, time::Instant};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tonic::{
    codec::CompressionEncoding,
    transport::{Server, server::Connected},
};
use tonic_health::ServingStatus;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Side length of the blank warmup grid.
pub const WARMUP_SIZE: u32 = 100;

/// How long abandoned requests get to flush their `UNAVAILABLE` replies.
const ABANDON_FLUSH: Duration = Duration::from_millis(250);

/// How long idle workers get to acknowledge the stop request.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Starting = 0,
    WarmingUp = 1,
    Serving = 2,
    Draining = 3,
    Stopped = 4,
}

impl Phase {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::WarmingUp,
            2 => Self::Serving,
            3 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::WarmingUp => "warming_up",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current [`Phase`], readable from any task.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub const fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, phase: Phase) {
        let previous = Phase::from_u8(self.0.swap(phase as u8, Ordering::AcqRel));
        tracing::debug!(from = %previous, to = %phase, "Lifecycle transition");
    }
}

/// Requests a graceful shutdown. Cheap to clone.
///
/// Only the first [`trigger`](Self::trigger) has an effect.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Starts the shutdown. Returns `true` only for the call that actually
    /// started it.
    pub fn trigger(&self) -> bool {
        if self.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Resolves once shutdown has been triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}

/// The process-wide server state.
pub struct Lifecycle {
    config: ServerConfig,
    engine: SharedEngine,
    phase: Arc<PhaseCell>,
    shutdown: ShutdownHandle,
}

impl Lifecycle {
    /// Constructs the engine with `build` and warms it up.
    ///
    /// Blocks for the duration of construction and warmup; call it from a
    /// blocking context.
    ///
    /// # Errors
    ///
    /// [`StartupError::Construct`] or [`StartupError::Warmup`]. No endpoint has
    /// been bound when either is returned.
    pub fn start<F>(config: ServerConfig, build: F) -> Result<Self, StartupError>
    where
        F: FnOnce(&ServerConfig) -> Result<SharedEngine, EngineError>,
    {
        let phase = Arc::new(PhaseCell::new(Phase::Starting));

        let started = Instant::now();
        let engine = build(&config).map_err(StartupError::Construct)?;
        tracing::info!(
            device = %config.engine.device,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Recognition engine constructed"
        );

        phase.set(Phase::WarmingUp);
        let started = Instant::now();
        let warmup = engine
            .recognize(&PixelGrid::blank(WARMUP_SIZE, WARMUP_SIZE))
            .map_err(StartupError::Warmup)?;
        tracing::info!(
            regions = warmup.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Recognition engine warmed up"
        );

        Ok(Self {
            config,
            engine,
            phase,
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// A shared view of the phase, for observers outside the serve loop.
    pub fn phase_cell(&self) -> Arc<PhaseCell> {
        Arc::clone(&self.phase)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serves `incoming` connections until shutdown is triggered and drained.
    ///
    /// Returns `Ok(())` after a signal-driven shutdown, including one that had
    /// to abandon work at the grace deadline.
    ///
    /// # Errors
    ///
    /// [`ServeError`] if the reflection service cannot be built or the
    /// transport fails while serving.
    pub async fn serve_with_incoming<I, IO, IE>(self, incoming: I) -> Result<(), ServeError>
    where
        I: Stream<Item = Result<IO, IE>>,
        IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
        IO::ConnectInfo: Clone + Send + Sync + 'static,
        IE: Into<tower::BoxError>,
    {
        let Self {
            config,
            engine,
            phase,
            shutdown,
        } = self;

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let pool = Arc::new(WorkerPool::spawn(
            engine,
            config.num_workers,
            config.queue_depth,
        ));
        let service = RecognitionService::new(Arc::clone(&pool), Arc::clone(&phase));

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<OcrServiceServer<RecognitionService>>()
            .await;

        // The transport drains gracefully once the listener has been released.
        let stop_accepting = CancellationToken::new();
        let incoming = StopAccepting::new(incoming, stop_accepting.clone());
        let listener_released = incoming.released();
        let server = Server::builder()
            .accept_http1(true)
            .http2_adaptive_window(Some(true))
            .http2_keepalive_interval(Some(config.keepalive_interval))
            .http2_keepalive_timeout(Some(config.keepalive_timeout))
            .layer(
                ServiceBuilder::new()
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    )
                    .layer(GrpcWebLayer::new()),
            )
            .add_service(health_service)
            .add_service(reflection)
            .add_service(build_ocr_service(service, config.max_message_bytes))
            .serve_with_incoming_shutdown(incoming, listener_released.cancelled_owned());
        tokio::pin!(server);

        phase.set(Phase::Serving);
        tracing::info!(
            workers = config.num_workers,
            queue_depth = config.queue_depth,
            "Service ready"
        );

        tokio::select! {
            result = &mut server => {
                // The transport stopped on its own.
                phase.set(Phase::Stopped);
                pool.shutdown(WORKER_STOP_TIMEOUT).await;
                result?;
                tracing::warn!("Listener closed without a shutdown request");
                return Ok(());
            }
            () = shutdown.triggered() => {}
        }

        // 1. Refuse new work and publish the status.
        phase.set(Phase::Draining);
        health_reporter
            .set_not_serving::<OcrServiceServer<RecognitionService>>()
            .await;
        health_reporter
            .set_service_status("", ServingStatus::NotServing)
            .await;
        stop_accepting.cancel();
        tracing::info!(
            in_flight = pool.in_flight(),
            grace_period_ms = config.grace_period.as_millis() as u64,
            "Draining in-flight requests"
        );

        // 2. Let in-flight requests finish within the grace period.
        let mut transport_result = Ok(());
        match timeout(config.grace_period, &mut server).await {
            Ok(result) => {
                tracing::info!("All connections drained");
                transport_result = result;
            }
            Err(_) => {
                // 3. Abandon whatever is left.
                tracing::warn!(
                    in_flight = pool.in_flight(),
                    "Grace period elapsed; abandoning remaining requests"
                );
                pool.abandon();
                if let Ok(result) = timeout(ABANDON_FLUSH, &mut server).await {
                    transport_result = result;
                }
            }
        }

        // 4. Release the pool.
        pool.shutdown(WORKER_STOP_TIMEOUT).await;
        phase.set(Phase::Stopped);

        if let Err(e) = transport_result {
            tracing::error!(error = %e, "Transport error during shutdown");
            return Err(e.into());
        }

        tracing::info!("Service shut down successfully");
        Ok(())
    }
}

fn build_ocr_service(
    service: RecognitionService,
    max_message_bytes: usize,
) -> OcrServiceServer<RecognitionService> {
    OcrServiceServer::new(service)
        .max_decoding_message_size(max_message_bytes)
        .max_encoding_message_size(max_message_bytes)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}
