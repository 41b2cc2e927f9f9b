//! HTTPS metrics endpoint and process lifecycle plumbing
//!
//! - `tls` - TLS policy resolution and rustls config
//! - `http1` - refusal of the HTTP/2 preface on accepted connections
//! - `metrics` - process-wide Prometheus catalogue
//! - `metrics_server` - HTTPS `/metrics` listener with start/stop
//! - `shutdown` - cancellation channel and SIGTERM/SIGINT handling
//! - `watch` - watched files that trigger shutdown on change

mod http1;
pub mod metrics;
mod metrics_server;
pub mod shutdown;
pub mod tls;
mod watch;

pub use metrics_server::{MetricsServer, MetricsServerError, ServerLifecycleState};
pub use shutdown::{
    shutdown_channel, ShutdownController, ShutdownSignal, ShutdownTrigger, SignalListener,
};
pub use tls::{resolve_tls_parameters, TlsError, TlsParameters};
pub use watch::{FileWatcher, WatchError};

#[cfg(test)]
#[path = "tls_test.rs"]
mod tls_tests;

#[cfg(test)]
#[path = "http1_test.rs"]
mod http1_tests;

#[cfg(test)]
#[path = "metrics_test.rs"]
mod metrics_tests;

#[cfg(test)]
#[path = "metrics_server_test.rs"]
mod metrics_server_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;

#[cfg(test)]
#[path = "watch_test.rs"]
mod watch_tests;
