#![allow(dead_code)]

use core::time::Duration;
use image::{ImageFormat, Rgb, RgbImage};
use ocr_tonic_core::{
    BoundingBox, RecognitionResult,
    proto::{RecognizeRequest, ocr_service_client::OcrServiceClient},
};
use ocr_tonic_server::{
    EngineError, Lifecycle, Phase, PixelGrid, RecognitionEngine, ServeError, ServerConfig,
    ShutdownHandle, server::lifecycle::PhaseCell, share,
};
use std::{
    io::Cursor,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint};

/// Counters shared between a [`StubEngine`] and the test that owns it.
#[derive(Debug, Default)]
pub struct Counters {
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

/// Deterministic engine for driving the server without a real model.
///
/// Each call reports a single region whose text is `"<width>x<height>"`.
pub struct StubEngine {
    delay: Duration,
    fail_width: Option<u32>,
    counters: Arc<Counters>,
}

impl StubEngine {
    pub fn new() -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let engine = Self {
            delay: Duration::ZERO,
            fail_width: None,
            counters: Arc::clone(&counters),
        };
        (engine, counters)
    }

    /// Every call sleeps for `delay` before answering.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls on grids exactly `width` pixels wide fail.
    pub const fn failing_on_width(mut self, width: u32) -> Self {
        self.fail_width = Some(width);
        self
    }
}

impl RecognitionEngine for StubEngine {
    fn recognize(&self, grid: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.counters.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_width == Some(grid.width()) {
            return Err(EngineError::Backend(format!(
                "inference failed on {}px wide input",
                grid.width()
            )));
        }

        Ok(vec![RecognitionResult {
            text: format!("{}x{}", grid.width(), grid.height()),
            confidence: 97.5,
            bbox: BoundingBox {
                left: 0,
                top: 0,
                width: grid.width(),
                height: grid.height(),
            },
        }])
    }
}

/// A white PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn request(image: Vec<u8>) -> RecognizeRequest {
    RecognizeRequest {
        image: image.into(),
    }
}

/// Config with small limits suited to tests.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        server_addr: "127.0.0.1:0".to_string(),
        num_workers: 4,
        queue_depth: 16,
        grace_period: Duration::from_secs(5),
        ..ServerConfig::default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    pub phase: Arc<PhaseCell>,
    pub task: JoinHandle<Result<(), ServeError>>,
}

impl TestServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn client(&self) -> OcrServiceClient<Channel> {
        OcrServiceClient::connect(self.url()).await.unwrap()
    }

    /// A client that gives up quickly, for probing a server that is going
    /// away.
    pub async fn impatient_client(&self) -> Result<OcrServiceClient<Channel>, tonic::transport::Error> {
        let channel = Endpoint::from_shared(self.url())?
            .connect_timeout(Duration::from_millis(500))
            .timeout(Duration::from_millis(500))
            .connect()
            .await?;
        Ok(OcrServiceClient::new(channel))
    }

    /// Triggers shutdown and waits for the serve loop to return.
    pub async fn stop(self) -> Result<(), ServeError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Starts a server for `engine` on an ephemeral loopback port.
pub async fn spawn_server<E: RecognitionEngine>(engine: E, config: ServerConfig) -> TestServer {
    let lifecycle = Lifecycle::start(config, |_| Ok(share(engine))).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = lifecycle.shutdown_handle();
    let phase = lifecycle.phase_cell();

    let task = tokio::spawn(lifecycle.serve_with_incoming(TcpListenerStream::new(listener)));

    tokio::time::timeout(Duration::from_secs(5), async {
        while phase.get() != Phase::Serving {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server never reached the serving phase");

    TestServer {
        addr,
        shutdown,
        phase,
        task,
    }
}
