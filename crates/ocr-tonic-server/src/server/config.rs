use crate::server::engine::{Backend, Device, tesseract::TesseractConfig};
use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use std::path::PathBuf;

/// All interfaces; IPv4 is covered too on dual-stack hosts.
pub const DEFAULT_SERVER_ADDR: &str = "[::]:50051";
pub const DEFAULT_NUM_WORKERS: usize = 8;
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_KEEPALIVE_TIMEOUT_MS: u64 = 5_000;
/// 50 MiB, applied to both inbound and outbound messages.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_LANGUAGES: &str = "eng";
pub const DEFAULT_TESSERACT_BIN: &str = "tesseract";

/// Output format of the console log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Runtime configuration for the `ocr-tonic-server` binary.
///
/// Every option can also be supplied through the environment variable named
/// in its description. A `.env` file in the working directory is loaded before
/// parsing.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ocr-tonic-server",
    version,
    about = "A gRPC service for recognizing text in images"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "[::]:50051", "0.0.0.0:50051" or "/tmp/ocr.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from(DEFAULT_SERVER_ADDR))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Number of requests processed concurrently.
    ///
    /// Each worker runs one decode + recognition at a time. Requests beyond
    /// this count wait in the queue.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = DEFAULT_NUM_WORKERS)]
    pub num_workers: usize,

    /// Capacity of the queue between RPC handlers and workers.
    ///
    /// When the queue is full, new requests wait for space instead of being
    /// rejected.
    ///
    /// Environment variable: `QUEUE_DEPTH`
    #[arg(long, env = "QUEUE_DEPTH", default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Seconds in-flight requests may keep running after a termination signal.
    ///
    /// Environment variable: `GRACE_PERIOD_SECS`
    #[arg(long, env = "GRACE_PERIOD_SECS", default_value_t = DEFAULT_GRACE_PERIOD_SECS)]
    pub grace_period_secs: u64,

    /// Interval between HTTP/2 keepalive pings, in milliseconds.
    ///
    /// Environment variable: `KEEPALIVE_INTERVAL_MS`
    #[arg(long, env = "KEEPALIVE_INTERVAL_MS", default_value_t = DEFAULT_KEEPALIVE_INTERVAL_MS)]
    pub keepalive_interval_ms: u64,

    /// Time to wait for a keepalive acknowledgement before closing the
    /// connection, in milliseconds.
    ///
    /// Environment variable: `KEEPALIVE_TIMEOUT_MS`
    #[arg(long, env = "KEEPALIVE_TIMEOUT_MS", default_value_t = DEFAULT_KEEPALIVE_TIMEOUT_MS)]
    pub keepalive_timeout_ms: u64,

    /// Largest accepted request and largest produced response, in bytes.
    ///
    /// Environment variable: `MAX_MESSAGE_BYTES`
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,

    /// Compute device handed to the recognition engine (`cpu`, `gpu`, `gpu:1`).
    ///
    /// Environment variable: `DEVICE`
    #[arg(long, env = "DEVICE", default_value_t = Device::Cpu)]
    pub device: Device,

    /// Recognition languages, `+`-separated (for example `eng+rus`).
    ///
    /// Environment variable: `OCR_LANGUAGES`
    #[arg(long, env = "OCR_LANGUAGES", default_value_t = String::from(DEFAULT_LANGUAGES))]
    pub languages: String,

    /// How Tesseract is driven: `cli` runs the executable once per call,
    /// `library` calls libtesseract in-process (needs the `leptess` feature).
    ///
    /// Environment variable: `ENGINE_BACKEND`
    #[arg(long, env = "ENGINE_BACKEND", value_enum, default_value_t = Backend::default())]
    pub engine_backend: Backend,

    /// Path or name of the `tesseract` executable, for the `cli` backend.
    ///
    /// Environment variable: `TESSERACT_BIN`
    #[arg(long, env = "TESSERACT_BIN", default_value = DEFAULT_TESSERACT_BIN)]
    pub tesseract_bin: PathBuf,

    /// Run at most one recognition at a time, regardless of `NUM_WORKERS`.
    ///
    /// Use this for engines that are not safe to call concurrently.
    ///
    /// Environment variable: `SERIALIZE_ENGINE`
    #[arg(long, env = "SERIALIZE_ENGINE", default_value_t = false)]
    pub serialize_engine: bool,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub num_workers: usize,
    pub queue_depth: usize,
    pub grace_period: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub max_message_bytes: usize,
    pub engine: TesseractConfig,
    pub serialize_engine: bool,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            uds: false,
            num_workers: DEFAULT_NUM_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_INTERVAL_MS),
            keepalive_timeout: Duration::from_millis(DEFAULT_KEEPALIVE_TIMEOUT_MS),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            engine: TesseractConfig {
                backend: Backend::default(),
                binary: PathBuf::from(DEFAULT_TESSERACT_BIN),
                languages: DEFAULT_LANGUAGES.to_string(),
                device: Device::Cpu,
            },
            serialize_engine: false,
            log_format: LogFormat::Pretty,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.queue_depth == 0 {
            bail!("QUEUE_DEPTH must be greater than 0");
        }

        if args.max_message_bytes == 0 {
            bail!("MAX_MESSAGE_BYTES must be greater than 0");
        }

        if args.keepalive_interval_ms == 0 || args.keepalive_timeout_ms == 0 {
            bail!("KEEPALIVE_INTERVAL_MS and KEEPALIVE_TIMEOUT_MS must be greater than 0");
        }

        let languages = args.languages.trim();
        if languages.is_empty() || languages.split('+').any(str::is_empty) {
            bail!(
                "OCR_LANGUAGES ({:?}) must be a non-empty, '+'-separated list",
                args.languages
            );
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            num_workers: args.num_workers,
            queue_depth: args.queue_depth,
            grace_period: Duration::from_secs(args.grace_period_secs),
            keepalive_interval: Duration::from_millis(args.keepalive_interval_ms),
            keepalive_timeout: Duration::from_millis(args.keepalive_timeout_ms),
            max_message_bytes: args.max_message_bytes,
            engine: TesseractConfig {
                backend: args.engine_backend,
                binary: args.tesseract_bin,
                languages: languages.to_string(),
                device: args.device,
            },
            serialize_engine: args.serialize_engine,
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("ocr-tonic-server").chain(extra.iter().copied()))?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn explicit_flags_are_applied() {
        let config = parse(&[
            "--num-workers",
            "2",
            "--queue-depth",
            "4",
            "--grace-period-secs",
            "1",
            "--device",
            "gpu:1",
            "--languages",
            "eng+rus",
            "--log-format",
            "json",
            "--engine-backend",
            "library",
        ])
        .unwrap();

        assert_eq!(config.num_workers, 2);
        assert_eq!(config.queue_depth, 4);
        assert_eq!(config.grace_period, Duration::from_secs(1));
        assert_eq!(config.engine.device, Device::Gpu { ordinal: 1 });
        assert_eq!(config.engine.languages, "eng+rus");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.engine.backend, Backend::Library);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = parse(&["--num-workers", "0"]).unwrap_err();
        assert!(err.to_string().contains("NUM_WORKERS"));
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        assert!(parse(&["--queue-depth", "0"]).is_err());
    }

    #[test]
    fn malformed_language_list_is_rejected() {
        assert!(parse(&["--languages", "eng++rus"]).is_err());
        assert!(parse(&["--languages", "  "]).is_err());
    }

    #[test]
    fn unknown_device_is_rejected_by_the_parser() {
        assert!(CliArgs::try_parse_from(["ocr-tonic-server", "--device", "tpu"]).is_err());
    }

    #[test]
    fn default_config_matches_documented_contract() {
        let config = ServerConfig::default();
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.max_message_bytes, 50 * 1024 * 1024);
        assert_eq!(config.engine.device, Device::Cpu);
    }

    #[test]
    fn default_address_listens_on_every_interface() {
        let addr: std::net::SocketAddr = DEFAULT_SERVER_ADDR.parse().unwrap();
        assert!(addr.ip().is_unspecified());
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 50051);
        assert_eq!(ServerConfig::default().server_addr, DEFAULT_SERVER_ADDR);
    }
}
