//! Process startup and shutdown for the operator
//!
//! Startup sequence:
//! 1. Load the controller config (or the built-in default)
//! 2. Install the SIGTERM/SIGINT listener and the watched-file source
//! 3. Race both sources into one [`ShutdownController`](crate::server::ShutdownController)
//! 4. Build and start the HTTPS metrics server
//! 5. Hand the shutdown signal to the leader-elected run capability and wait
//!
//! Any error before or from step 5 is returned to `main`, which exits non-zero.

use crate::config::load_controller_config;
use crate::server::{
    shutdown_channel, FileWatcher, MetricsServer, ShutdownSignal, ShutdownTrigger, SignalListener,
};
use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::info;

/// Serving certificate, mounted from the operator's TLS Secret
pub const TLS_CERT_PATH: &str = "/etc/secrets/tls.crt";

/// Serving key, mounted from the operator's TLS Secret
pub const TLS_KEY_PATH: &str = "/etc/secrets/tls.key";

/// Command line flags
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "cluster-image-registry-operator",
    about = "OpenShift cluster image registry operator",
    version
)]
pub struct Args {
    /// Path to a kubeconfig. Only required if out-of-cluster
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// File to watch; a change shuts the operator down (repeatable)
    #[arg(long = "files", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Path to the controller config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// The long-running, leader-election-gated part of the operator
///
/// Implementations must return once `shutdown` fires; the coordinator waits
/// for them without a timeout.
#[async_trait]
pub trait LeaderElectedRun: Send + Sync {
    async fn run(&self, shutdown: ShutdownSignal) -> anyhow::Result<()>;
}

/// Wait for whichever shutdown source fires first
pub async fn first_trigger<S, F>(signal: S, file_changed: F) -> ShutdownTrigger
where
    S: Future<Output = &'static str>,
    F: Future<Output = PathBuf>,
{
    tokio::select! {
        name = signal => ShutdownTrigger::Signal(name),
        path = file_changed => ShutdownTrigger::WatchedFileChanged(path),
    }
}

fn print_version() {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        "Cluster Image Registry Operator"
    );
}

/// Wires configuration, shutdown triggers, metrics server and run loop
pub struct Coordinator {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    /// Coordinator serving metrics with the mounted TLS Secret
    pub fn new() -> Self {
        Self {
            cert_path: PathBuf::from(TLS_CERT_PATH),
            key_path: PathBuf::from(TLS_KEY_PATH),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_tls_paths(cert_path: &Path, key_path: &Path) -> Self {
        Self {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
        }
    }

    /// Paths the serving certificate and key are read from
    pub fn tls_paths(&self) -> (&Path, &Path) {
        (&self.cert_path, &self.key_path)
    }

    /// Run the operator until `runner` returns
    pub async fn run<R>(&self, args: &Args, runner: &R) -> anyhow::Result<()>
    where
        R: LeaderElectedRun + ?Sized,
    {
        print_version();

        let config =
            load_controller_config(args.config.as_deref()).context("failed to read config")?;

        info!(files = ?args.files, "Watching files");
        let mut signals = SignalListener::install().context("failed to install signal handlers")?;
        let mut watcher = FileWatcher::start(&args.files).context("failed to watch files")?;

        let (shutdown_controller, shutdown_signal) = shutdown_channel();
        let triggers = tokio::spawn(async move {
            let trigger = first_trigger(signals.recv(), watcher.changed()).await;
            info!(trigger = %trigger, "Shutting down the operator");
            shutdown_controller.shutdown();
        });

        let mut metrics_server =
            match MetricsServer::new(&self.cert_path, &self.key_path, &config.serving_info) {
                Ok(server) => server,
                Err(e) => {
                    triggers.abort();
                    return Err(e).context("failed to create metrics server");
                }
            };
        if let Err(e) = metrics_server.start() {
            triggers.abort();
            return Err(e).context("failed to start metrics server");
        }

        let result = runner.run(shutdown_signal).await;

        metrics_server.stop().await;
        triggers.abort();

        result.context("operator run failed")
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
