//! HTTPS server exposing the operator metrics
//!
//! - `/metrics` - Prometheus metrics in text format
//!
//! Everything that can fail because of configuration (TLS names, PEM files,
//! empty bind address) is checked in [`MetricsServer::new`] before a socket is
//! opened. The listener is bound at construction so bind errors surface there
//! too; [`MetricsServer::start`] only spawns the accept loop.
//!
//! ## Lifecycle
//! ```text
//! new() ──▶ Stopped ──start()──▶ Running ──stop()──▶ Stopped
//!              └───────────────stop()──────────────────┘
//! ```
//! Connections are HTTP/1.1 only: ALPN offers nothing else and a client
//! opening with the HTTP/2 preface is dropped.
//!
//! `stop()` is immediate: the listener and every live connection are closed
//! without draining in-flight scrapes.

use crate::config::ServingConfig;
use crate::server::http1::{self, Rewind};
use crate::server::metrics::{self, OperatorMetrics, TEXT_CONTENT_TYPE};
use crate::server::tls::{self, TlsError};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Errors that can occur while building or starting the metrics server
#[derive(Debug, Error)]
pub enum MetricsServerError {
    #[error("serving bind address is empty")]
    EmptyBindAddress,

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics server already started")]
    AlreadyStarted,

    #[error("metrics server was stopped")]
    Stopped,
}

impl MetricsServerError {
    /// True for errors caused by the supplied configuration rather than the
    /// environment
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MetricsServerError::EmptyBindAddress | MetricsServerError::Tls(_)
        )
    }
}

/// Lifecycle state of a [`MetricsServer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLifecycleState {
    Stopped,
    Running,
}

/// Acceptor wrapper that keeps every connection on HTTP/1.1
///
/// Failed TLS handshakes are logged, and connections opening with the HTTP/2
/// preface are dropped before hyper sees them. Either only drops that
/// connection; the accept loop goes on.
#[derive(Clone)]
struct Http1Acceptor<A> {
    inner: A,
}

impl<A, I, S> Accept<I, S> for Http1Acceptor<A>
where
    A: Accept<I, S>,
    A::Future: Send + 'static,
    A::Stream: AsyncRead + Unpin + Send + 'static,
    A::Service: Send + 'static,
{
    type Stream = Rewind<A::Stream>;
    type Service = A::Service;
    type Future =
        Pin<Box<dyn Future<Output = std::io::Result<(Self::Stream, Self::Service)>> + Send>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let accepting = self.inner.accept(stream, service);
        Box::pin(async move {
            let (stream, service) = accepting
                .await
                .inspect_err(|e| info!(error = %e, "TLS handshake failed"))?;
            let stream = http1::refuse_http2_preface(stream)
                .await
                .inspect_err(|e| info!(error = %e, "Connection dropped before serving"))?;
            Ok((stream, service))
        })
    }
}

/// Prometheus metrics handler
async fn serve_metrics(State(metrics): State<&'static OperatorMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Build the router; `/metrics` is the only route
fn build_router(metrics: &'static OperatorMetrics) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(metrics)
}

/// HTTPS listener serving the metrics registry
pub struct MetricsServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    tls_config: RustlsConfig,
    metrics: &'static OperatorMetrics,
    handle: Handle,
    task: Option<JoinHandle<()>>,
    state: ServerLifecycleState,
}

impl MetricsServer {
    /// Build a server for the process-wide metrics registry
    ///
    /// # Arguments
    /// * `cert_path` - PEM certificate chain
    /// * `key_path` - PEM private key
    /// * `serving` - bind address and TLS policy
    pub fn new(
        cert_path: &Path,
        key_path: &Path,
        serving: &ServingConfig,
    ) -> Result<Self, MetricsServerError> {
        Self::with_metrics(cert_path, key_path, serving, metrics::global())
    }

    /// Build a server exposing a specific metrics instance
    pub fn with_metrics(
        cert_path: &Path,
        key_path: &Path,
        serving: &ServingConfig,
        metrics: &'static OperatorMetrics,
    ) -> Result<Self, MetricsServerError> {
        if serving.bind_address.is_empty() {
            return Err(MetricsServerError::EmptyBindAddress);
        }

        let params = tls::resolve_tls_parameters(
            serving.min_tls_version.as_deref(),
            &serving.cipher_suites,
        )?;
        let (cert_chain, key) = tls::load_certified_key(cert_path, key_path)?;
        let rustls_config = tls::build_rustls_config(&params, cert_chain, key)?;

        let bind_err = |source| MetricsServerError::Bind {
            address: serving.bind_address.clone(),
            source,
        };
        let listener = TcpListener::bind(serving.bind_address.as_str()).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(
            address = %local_addr,
            min_tls_version = tls::version_name(params.min_version),
            cipher_suites = params.cipher_suite_ids.len(),
            "Metrics server bound"
        );

        Ok(Self {
            listener: Some(listener),
            local_addr,
            tls_config: RustlsConfig::from_config(rustls_config),
            metrics,
            handle: Handle::new(),
            task: None,
            state: ServerLifecycleState::Stopped,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerLifecycleState {
        self.state
    }

    /// Start accepting connections in a background task
    ///
    /// Must be called from within a tokio runtime. Calling it on a running
    /// server, or after `stop()`, is an error.
    pub fn start(&mut self) -> Result<(), MetricsServerError> {
        if self.state == ServerLifecycleState::Running {
            return Err(MetricsServerError::AlreadyStarted);
        }
        let listener = self.listener.take().ok_or(MetricsServerError::Stopped)?;

        let app = build_router(self.metrics);
        let acceptor = Http1Acceptor {
            inner: RustlsAcceptor::new(self.tls_config.clone()),
        };
        let server = axum_server::from_tcp(listener)
            .acceptor(acceptor)
            .handle(self.handle.clone());
        let address = self.local_addr;

        self.task = Some(tokio::spawn(async move {
            if let Err(e) = server.serve(app.into_make_service()).await {
                error!(address = %address, error = %e, "Metrics server terminated");
            }
        }));
        self.state = ServerLifecycleState::Running;

        info!(address = %address, "Metrics server listening (HTTPS)");
        Ok(())
    }

    /// Close the listener and all live connections
    ///
    /// Safe on a server that was never started and safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.handle.shutdown();
        // Never started: dropping the listener closes the socket
        drop(self.listener.take());

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Metrics server task did not finish cleanly");
            }
            info!(address = %self.local_addr, "Metrics server stopped");
        }
        self.state = ServerLifecycleState::Stopped;
    }
}
