use anyhow::Context;
use clap::Parser;
use core::time::Duration;
use ocr_tonic_server::server::{
    config::{CliArgs, ServerConfig},
    engine,
    lifecycle::Lifecycle,
    signals::ShutdownSignals,
    telemetry::init_telemetry,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Bound on waiting for abandoned recognitions once serving has stopped.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    // Built by hand so that blocking work left behind by an abandoned
    // shutdown cannot keep the process alive.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ocr-tonic")
        .build()
        .context("failed to build Tokio runtime")?;

    let result = runtime.block_on(async {
        let providers = init_telemetry(config.log_format)?;
        let result = run(config).await;
        if let Err(e) = &result {
            tracing::error!(error = ?e, "Server exited with an error");
        }
        providers.shutdown();
        result
    });

    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    log_startup_info(&config);

    let lifecycle = tokio::task::spawn_blocking(move || {
        Lifecycle::start(config, |config| {
            engine::build(&config.engine, config.serialize_engine, config.num_workers)
        })
    })
    .await
    .context("startup task aborted")??;

    let signals = ShutdownSignals::install().context("failed to install signal handlers")?;
    signals.forward_to(lifecycle.shutdown_handle());

    let addr = lifecycle.config().server_addr.clone();
    if lifecycle.config().uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;

            let uds = UnixListener::bind(&addr)
                .with_context(|| format!("failed to bind Unix socket {addr}"))?;
            tracing::info!(addr = %addr, "Listening on Unix socket");
            let result = lifecycle
                .serve_with_incoming(UnixListenerStream::new(uds))
                .await;
            // A panic may still leave the socket file behind.
            let _ = std::fs::remove_file(&addr);
            result?;
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!(addr = %tcp.local_addr()?, "Listening");
        lifecycle
            .serve_with_incoming(TcpListenerStream::new(tcp))
            .await?;
    }

    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting OCR service with full config: {config:#?}");
    } else {
        tracing::info!(
            addr = %config.server_addr,
            workers = config.num_workers,
            device = %config.engine.device,
            languages = %config.engine.languages,
            "Starting OCR service"
        );
    }
}
