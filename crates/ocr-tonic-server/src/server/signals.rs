//! OS termination signals.
//!
//! SIGINT and SIGTERM both request the same graceful shutdown. Signals are
//! only translated into [`ShutdownHandle::trigger`] calls here; everything
//! else about shutdown lives in the lifecycle, which tests drive directly.

use crate::server::lifecycle::ShutdownHandle;
use std::io;
use tokio::task::JoinHandle;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignals {
    /// Registers the signal handlers. Must be called from within a Tokio
    /// runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            interrupt: signal(SignalKind::interrupt())?,
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Waits for the next termination signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                Some(()) = self.interrupt.recv() => "SIGINT",
                Some(()) = self.terminate.recv() => "SIGTERM",
                else => std::future::pending().await,
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            "Ctrl+C"
        }
    }

    /// Forwards every received signal to `handle` until the process exits.
    ///
    /// Only the first signal starts a shutdown; later ones are logged.
    pub fn forward_to(mut self, handle: ShutdownHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let name = self.recv().await;
                if handle.trigger() {
                    tracing::info!(signal = name, "Shutdown signal received, terminating gracefully...");
                } else {
                    tracing::info!(signal = name, "Shutdown already in progress; ignoring signal");
                }
            }
        })
    }
}
