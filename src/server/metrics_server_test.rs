//! Tests for the HTTPS metrics server

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::metrics::OperatorMetrics;
use super::metrics_server::*;
use crate::config::ServingConfig;
use crate::test_support::write_self_signed_cert;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{CipherSuite, SupportedProtocolVersion};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

struct Fixture {
    _dir: tempfile::TempDir,
    cert: PathBuf,
    key: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let (cert, key) = write_self_signed_cert(dir.path());
    Fixture {
        _dir: dir,
        cert,
        key,
    }
}

fn serving(bind_address: &str, min_tls_version: Option<&str>) -> ServingConfig {
    ServingConfig {
        bind_address: bind_address.to_string(),
        min_tls_version: min_tls_version.map(str::to_string),
        cipher_suites: Vec::new(),
    }
}

fn isolated_metrics() -> &'static OperatorMetrics {
    Box::leak(Box::new(OperatorMetrics::new().unwrap()))
}

/// HTTPS client pinned to one TLS version
fn client(version: reqwest::tls::Version) -> reqwest::Client {
    reqwest::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(true)
        .min_tls_version(version)
        .max_tls_version(version)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// A port that was free a moment ago
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn started(fx: &Fixture, config: &ServingConfig) -> MetricsServer {
    let mut server = MetricsServer::with_metrics(&fx.cert, &fx.key, config, isolated_metrics())
        .expect("server should build");
    server.start().expect("server should start");
    server
}

/// Raw TLS connection trusting the test certificate
///
/// An empty `suites` offers the provider defaults; `alpn` is sent as given.
async fn connect_raw(
    fx: &Fixture,
    server: &MetricsServer,
    versions: &[&'static SupportedProtocolVersion],
    suites: &[CipherSuite],
    alpn: &[&[u8]],
) -> std::io::Result<TlsStream<TcpStream>> {
    let pem = std::fs::read(&fx.cert).unwrap();
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots.add(cert.unwrap()).unwrap();
    }

    let defaults = rustls::crypto::ring::default_provider();
    let cipher_suites = if suites.is_empty() {
        defaults.cipher_suites.clone()
    } else {
        suites
            .iter()
            .map(|id| {
                *defaults
                    .cipher_suites
                    .iter()
                    .find(|s| s.suite() == *id)
                    .expect("suite implemented by ring")
            })
            .collect()
    };
    let provider = CryptoProvider {
        cipher_suites,
        ..defaults
    };

    let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(versions)
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect(server.local_addr()).await?;
    connector
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
}

/// Send a plain HTTP/1.1 scrape and return the response head
async fn http1_get_metrics(stream: &mut TlsStream<TcpStream>) -> String {
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    while !response.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        response.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&response).into_owned()
}

fn negotiated_suite(stream: &TlsStream<TcpStream>) -> Option<CipherSuite> {
    stream.get_ref().1.negotiated_cipher_suite().map(|s| s.suite())
}

async fn scrape(
    client: &reqwest::Client,
    server: &MetricsServer,
) -> Result<reqwest::Response, reqwest::Error> {
    client
        .get(format!("https://{}/metrics", server.local_addr()))
        .send()
        .await
}

/// Test: unknown TLS version fails construction without binding the port
#[tokio::test]
async fn test_unknown_tls_version_binds_no_socket() {
    let fx = fixture();
    let port = free_port();
    let address = format!("127.0.0.1:{}", port);

    let result = MetricsServer::new(
        &fx.cert,
        &fx.key,
        &serving(&address, Some("InvalidTLSVersion")),
    );

    let err = result.err().expect("construction should fail");
    assert!(err.is_configuration());
    // Port is still free, so nothing was bound
    assert!(std::net::TcpListener::bind(&address).is_ok());
}

/// Test: unknown cipher suite fails construction
#[tokio::test]
async fn test_unknown_cipher_suite_rejected() {
    let fx = fixture();
    let mut config = serving("127.0.0.1:0", Some("VersionTLS12"));
    config.cipher_suites = vec!["INVALID_CIPHER_SUITE".to_string()];

    let result = MetricsServer::new(&fx.cert, &fx.key, &config);

    assert!(matches!(result, Err(MetricsServerError::Tls(_))));
}

/// Test: empty bind address is rejected before anything else
#[tokio::test]
async fn test_empty_bind_address_rejected() {
    let fx = fixture();

    let result = MetricsServer::new(&fx.cert, &fx.key, &serving("", None));

    assert!(matches!(result, Err(MetricsServerError::EmptyBindAddress)));
}

/// Test: missing certificate is a configuration error
#[tokio::test]
async fn test_missing_certificate_rejected() {
    let fx = fixture();
    let missing = fx.cert.with_file_name("missing.crt");

    let result = MetricsServer::new(&missing, &fx.key, &serving("127.0.0.1:0", None));

    let err = result.err().expect("construction should fail");
    assert!(err.is_configuration());
}

/// Test: an occupied port is a transport error
#[tokio::test]
async fn test_bind_failure_reported() {
    let fx = fixture();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap().to_string();

    let result = MetricsServer::new(&fx.cert, &fx.key, &serving(&address, None));

    let err = result.err().expect("bind should fail");
    assert!(matches!(err, MetricsServerError::Bind { .. }));
    assert!(!err.is_configuration());
}

/// Test: stop on a never-started server succeeds, twice
#[tokio::test]
async fn test_stop_never_started_is_idempotent() {
    let fx = fixture();
    let mut server = MetricsServer::new(&fx.cert, &fx.key, &serving("127.0.0.1:0", None)).unwrap();
    let address = server.local_addr();

    server.stop().await;
    server.stop().await;

    assert_eq!(server.state(), ServerLifecycleState::Stopped);
    // Listener was released
    assert!(std::net::TcpListener::bind(address).is_ok());
}

/// Test: lifecycle transitions and start misuse
#[tokio::test]
async fn test_lifecycle_transitions() {
    let fx = fixture();
    let mut server = started(&fx, &serving("127.0.0.1:0", None)).await;
    assert_eq!(server.state(), ServerLifecycleState::Running);

    assert!(matches!(
        server.start(),
        Err(MetricsServerError::AlreadyStarted)
    ));

    server.stop().await;
    assert_eq!(server.state(), ServerLifecycleState::Stopped);
    server.stop().await;

    assert!(matches!(server.start(), Err(MetricsServerError::Stopped)));
}

/// Test: /metrics serves the text exposition format
#[tokio::test]
async fn test_metrics_endpoint_serves_exposition() {
    let fx = fixture();
    let mut server = started(&fx, &serving("127.0.0.1:0", None)).await;

    let response = scrape(&client(reqwest::tls::Version::TLS_1_2), &server)
        .await
        .expect("scrape should succeed");

    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    let body = response.text().await.unwrap();
    assert!(body.contains("image_registry_operator_storage_reconfigured_total"));
    assert!(body.contains("image_registry_operator_image_pruner_install_status"));

    server.stop().await;
}

/// Test: scraped counter follows storage reconfigurations
#[tokio::test]
async fn test_scrape_reflects_storage_reconfigured() {
    let fx = fixture();
    let metrics = isolated_metrics();
    let mut server =
        MetricsServer::with_metrics(&fx.cert, &fx.key, &serving("127.0.0.1:0", None), metrics)
            .unwrap();
    server.start().unwrap();
    let client = client(reqwest::tls::Version::TLS_1_3);

    for (calls, expected) in [(0, "0"), (5, "5"), (5, "10")] {
        for _ in 0..calls {
            metrics.storage_reconfigured();
        }
        let body = scrape(&client, &server).await.unwrap().text().await.unwrap();
        let line = format!(
            "image_registry_operator_storage_reconfigured_total {}",
            expected
        );
        assert!(
            body.lines().any(|l| l == line),
            "expected `{}` in:\n{}",
            line,
            body
        );
    }

    server.stop().await;
}

/// Test: unrouted paths return 404
#[tokio::test]
async fn test_unrouted_path_returns_404() {
    let fx = fixture();
    let mut server = started(&fx, &serving("127.0.0.1:0", None)).await;

    let response = client(reqwest::tls::Version::TLS_1_2)
        .get(format!("https://{}/healthz", server.local_addr()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    server.stop().await;
}

/// Test: handshake matrix for the configured minimum version
#[tokio::test]
async fn test_tls_version_negotiation() {
    use reqwest::tls::Version;

    let cases = [
        (None, Version::TLS_1_2, true),
        (None, Version::TLS_1_3, true),
        (Some("VersionTLS12"), Version::TLS_1_2, true),
        (Some("VersionTLS12"), Version::TLS_1_3, true),
        (Some("VersionTLS13"), Version::TLS_1_3, true),
        (Some("VersionTLS13"), Version::TLS_1_2, false),
    ];

    let fx = fixture();
    for (min_version, client_version, expect_success) in cases {
        let mut server = started(&fx, &serving("127.0.0.1:0", min_version)).await;

        let result = scrape(&client(client_version), &server).await;

        assert_eq!(
            result.is_ok(),
            expect_success,
            "server min {:?}, client {:?}: {:?}",
            min_version,
            client_version,
            result.err()
        );
        server.stop().await;
    }
}

/// Test: a failed handshake does not stop the accept loop
#[tokio::test]
async fn test_failed_handshake_keeps_serving() {
    use reqwest::tls::Version;

    let fx = fixture();
    let mut server = started(&fx, &serving("127.0.0.1:0", Some("VersionTLS13"))).await;

    assert!(scrape(&client(Version::TLS_1_2), &server).await.is_err());
    assert!(scrape(&client(Version::TLS_1_3), &server).await.is_ok());

    server.stop().await;
}

/// Test: stop closes the listener immediately
#[tokio::test]
async fn test_stop_closes_listener() {
    let fx = fixture();
    let mut server = started(&fx, &serving("127.0.0.1:0", None)).await;
    let client = client(reqwest::tls::Version::TLS_1_3);
    assert!(scrape(&client, &server).await.is_ok());

    server.stop().await;

    let after = client
        .get(format!("https://{}/metrics", server.local_addr()))
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    assert!(after.is_err(), "no connection should be served after stop");
}

/// Test: a client sending the HTTP/2 preface without ALPN gets no HTTP/2 session
#[tokio::test]
async fn test_http2_preface_without_alpn_refused() {
    let fx = fixture();
    let mut server = started(&fx, &serving("127.0.0.1:0", None)).await;

    let mut stream = connect_raw(&fx, &server, rustls::ALL_VERSIONS, &[], &[])
        .await
        .expect("handshake without ALPN should succeed");
    assert_eq!(stream.get_ref().1.alpn_protocol(), None);

    let mut opening = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n".to_vec();
    // Empty SETTINGS frame
    opening.extend_from_slice(&[0, 0, 0, 4, 0, 0, 0, 0, 0]);
    stream.write_all(&opening).await.unwrap();

    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("connection should be closed by the server");
    let settings_frame = matches!(read, Ok(n) if n >= 9 && buf[3] == 0x04);
    assert!(!settings_frame, "server answered with an HTTP/2 SETTINGS frame");

    // The accept loop keeps serving HTTP/1.1
    let response = scrape(&client(reqwest::tls::Version::TLS_1_3), &server)
        .await
        .expect("HTTP/1.1 scrape should still succeed");
    assert_eq!(response.status(), 200);

    server.stop().await;
}

/// Test: ALPN negotiates only http/1.1
#[tokio::test]
async fn test_alpn_negotiates_http11_only() {
    let fx = fixture();
    let mut server = started(&fx, &serving("127.0.0.1:0", None)).await;

    let h2_only = connect_raw(
        &fx,
        &server,
        rustls::ALL_VERSIONS,
        &[],
        &[b"h2".as_slice()],
    )
    .await;
    assert!(h2_only.is_err(), "h2-only client should be rejected");

    let mut both = connect_raw(
        &fx,
        &server,
        rustls::ALL_VERSIONS,
        &[],
        &[b"h2".as_slice(), b"http/1.1".as_slice()],
    )
    .await
    .expect("client offering http/1.1 should connect");
    assert_eq!(both.get_ref().1.alpn_protocol(), Some(&b"http/1.1"[..]));
    assert!(http1_get_metrics(&mut both).await.starts_with("HTTP/1.1 200"));

    server.stop().await;
}

/// Test: a declared suite list restricts TLS 1.2 negotiation
#[tokio::test]
async fn test_declared_cipher_suite_enforced() {
    // The test certificate carries an ECDSA P-256 key
    let fx = fixture();
    let mut config = serving("127.0.0.1:0", Some("VersionTLS12"));
    config.cipher_suites = vec!["TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384".to_string()];
    let mut server = started(&fx, &config).await;
    let tls12 = &[&rustls::version::TLS12];

    let mut declared = connect_raw(
        &fx,
        &server,
        tls12,
        &[CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384],
        &[],
    )
    .await
    .expect("declared suite should be negotiated");
    assert_eq!(
        negotiated_suite(&declared),
        Some(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384)
    );
    assert!(http1_get_metrics(&mut declared).await.starts_with("HTTP/1.1 200"));

    let undeclared = connect_raw(
        &fx,
        &server,
        tls12,
        &[CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256],
        &[],
    )
    .await;
    assert!(undeclared.is_err(), "undeclared TLS 1.2 suite should be refused");

    server.stop().await;
}

/// Test: declared order wins over the client's preference
#[tokio::test]
async fn test_declared_cipher_suite_order_wins() {
    let fx = fixture();
    let aes128 = CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256;
    let aes256 = CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384;
    let cases = [
        (
            ["TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384", "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"],
            aes256,
        ),
        (
            ["TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256", "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"],
            aes128,
        ),
    ];

    for (declared, expected) in cases {
        let mut config = serving("127.0.0.1:0", Some("VersionTLS12"));
        config.cipher_suites = declared.iter().map(|s| s.to_string()).collect();
        let mut server = started(&fx, &config).await;

        // Client prefers AES-128
        let stream = connect_raw(
            &fx,
            &server,
            &[&rustls::version::TLS12],
            &[aes128, aes256],
            &[],
        )
        .await
        .unwrap();

        assert_eq!(negotiated_suite(&stream), Some(expected), "declared {:?}", declared);
        server.stop().await;
    }
}
