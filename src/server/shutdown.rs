//! Shutdown handling for the operator
//!
//! One [`ShutdownController`] owns the cancellation decision; every long
//! running activity holds a cloned [`ShutdownSignal`]. The first trigger
//! (OS signal or watched file change) wins, later triggers are no-ops.

use std::fmt;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

/// Why the process is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGTERM, SIGINT or Ctrl+C
    Signal(&'static str),
    /// One of the `--files` changed on disk
    WatchedFileChanged(PathBuf),
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Signal(name) => write!(f, "received {}", name),
            ShutdownTrigger::WatchedFileChanged(path) => {
                write!(f, "watched file {} changed", path.display())
            }
        }
    }
}

/// Receiving side of the cancellation decision
///
/// Cancellation is cooperative: holders poll [`is_shutdown`](Self::is_shutdown)
/// or await [`wait`](Self::wait).
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Sender dropped, treat as shutdown
                break;
            }
        }
    }

    /// Check if shutdown was signaled (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Controller for triggering shutdown
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Trigger shutdown
    ///
    /// Returns `true` only for the call that actually flipped the state.
    pub fn shutdown(&self) -> bool {
        let triggered = self.sender.send_if_modified(|down| {
            if *down {
                false
            } else {
                *down = true;
                true
            }
        });
        if triggered {
            info!("Shutdown signal sent");
        }
        triggered
    }

    /// A new receiver for the same decision
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Create a new shutdown signal pair
///
/// Returns (controller, signal) where:
/// - controller: Used to trigger shutdown
/// - signal: Cloned and passed to components that need to listen
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Registered SIGTERM/SIGINT handlers
///
/// Handlers are installed by [`SignalListener::install`] so a registration
/// failure surfaces at startup instead of inside a background task.
#[cfg(unix)]
pub struct SignalListener {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Register the SIGTERM and SIGINT handlers
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for SIGTERM or SIGINT, returning the signal name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM");
                "SIGTERM"
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT");
                "SIGINT"
            }
        }
    }
}

/// Ctrl+C listener (Windows)
#[cfg(not(unix))]
pub struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    /// Nothing to register; Ctrl+C is awaited directly in `recv`
    pub fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    /// Wait for Ctrl+C
    pub async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to wait for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
        "CTRL_C"
    }
}
