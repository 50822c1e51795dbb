//! Termination signal handling

use std::io;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::info;

/// SIGINT/SIGTERM listener that starts a graceful shutdown
///
/// Handlers are installed eagerly so a signal arriving while the session is
/// still connecting is not lost.
pub struct ShutdownTrigger {
    sigint: Signal,
    sigterm: Signal,
}

impl ShutdownTrigger {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Resolve on the first signal, returning its name
    pub async fn wait(mut self) -> &'static str {
        let name = tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
        };
        info!("Received {}, shutting down gracefully...", name);
        name
    }
}
