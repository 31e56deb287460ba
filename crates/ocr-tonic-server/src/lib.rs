#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    config::{CliArgs, ServerConfig},
    engine::{Device, EngineError, PixelGrid, RecognitionEngine, SharedEngine, share},
    error::{ServeError, StartupError},
    lifecycle::{Lifecycle, Phase, ShutdownHandle},
};
