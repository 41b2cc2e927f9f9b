//! TLS policy for the metrics endpoint
//!
//! Turns the declarative `minTLSVersion` / `cipherSuites` names from the
//! serving configuration into concrete protocol parameters, then builds the
//! rustls `ServerConfig` the HTTPS listener runs with.
//!
//! ## Resolution
//! ```text
//! "VersionTLS13"                          -> 0x0304
//! ["TLS_AES_128_GCM_SHA256", ...]         -> [0x1301, ...]
//! ```
//! Resolution is all-or-nothing: one unknown name fails the whole policy.

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{CipherSuite, SupportedCipherSuite, SupportedProtocolVersion};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// TLS 1.0 protocol id
pub const VERSION_TLS10: u16 = 0x0301;
/// TLS 1.1 protocol id
pub const VERSION_TLS11: u16 = 0x0302;
/// TLS 1.2 protocol id
pub const VERSION_TLS12: u16 = 0x0303;
/// TLS 1.3 protocol id
pub const VERSION_TLS13: u16 = 0x0304;

/// Minimum version used when the configuration leaves it empty
pub const DEFAULT_MIN_TLS_VERSION: u16 = VERSION_TLS12;

/// The only application protocol offered through ALPN.
///
/// HTTP/2 is never negotiated on the metrics listener.
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

const VERSIONS: &[(&str, u16)] = &[
    ("VersionTLS10", VERSION_TLS10),
    ("VersionTLS11", VERSION_TLS11),
    ("VersionTLS12", VERSION_TLS12),
    ("VersionTLS13", VERSION_TLS13),
];

// IANA names and ids
const CIPHER_SUITES: &[(&str, u16)] = &[
    // TLS 1.0 - 1.2
    ("TLS_RSA_WITH_RC4_128_SHA", 0x0005),
    ("TLS_RSA_WITH_3DES_EDE_CBC_SHA", 0x000a),
    ("TLS_RSA_WITH_AES_128_CBC_SHA", 0x002f),
    ("TLS_RSA_WITH_AES_256_CBC_SHA", 0x0035),
    ("TLS_RSA_WITH_AES_128_CBC_SHA256", 0x003c),
    ("TLS_RSA_WITH_AES_128_GCM_SHA256", 0x009c),
    ("TLS_RSA_WITH_AES_256_GCM_SHA384", 0x009d),
    ("TLS_ECDHE_ECDSA_WITH_RC4_128_SHA", 0xc007),
    ("TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA", 0xc009),
    ("TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA", 0xc00a),
    ("TLS_ECDHE_RSA_WITH_RC4_128_SHA", 0xc011),
    ("TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA", 0xc012),
    ("TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA", 0xc013),
    ("TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA", 0xc014),
    ("TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256", 0xc023),
    ("TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256", 0xc027),
    ("TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256", 0xc02b),
    ("TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384", 0xc02c),
    ("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256", 0xc02f),
    ("TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384", 0xc030),
    ("TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256", 0xcca8),
    ("TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305", 0xcca8),
    ("TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256", 0xcca9),
    ("TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305", 0xcca9),
    // TLS 1.3
    ("TLS_AES_128_GCM_SHA256", 0x1301),
    ("TLS_AES_256_GCM_SHA384", 0x1302),
    ("TLS_CHACHA20_POLY1305_SHA256", 0x1303),
];

/// Errors that can occur while resolving the TLS policy or building the
/// server configuration
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("unknown TLS version {0:?}")]
    UnknownVersion(String),

    #[error("unknown cipher suite {0:?}")]
    UnknownCipherSuite(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no PEM data of the expected kind in {0}")]
    InvalidPem(PathBuf),

    #[error("failed to build TLS config: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Concrete TLS parameters derived from the serving configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsParameters {
    /// Minimum protocol version id (e.g. `0x0303` for TLS 1.2)
    pub min_version: u16,
    /// Cipher suite ids in declaration order; empty means platform default
    pub cipher_suite_ids: Vec<u16>,
}

/// Look up a TLS version by name.
///
/// An empty name yields [`DEFAULT_MIN_TLS_VERSION`].
pub fn tls_version(name: &str) -> Result<u16, TlsError> {
    if name.is_empty() {
        return Ok(DEFAULT_MIN_TLS_VERSION);
    }
    VERSIONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, id)| *id)
        .ok_or_else(|| TlsError::UnknownVersion(name.to_string()))
}

/// Look up a cipher suite id by its IANA name
pub fn cipher_suite(name: &str) -> Result<u16, TlsError> {
    CIPHER_SUITES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, id)| *id)
        .ok_or_else(|| TlsError::UnknownCipherSuite(name.to_string()))
}

/// Name of a protocol version id, for logging
pub fn version_name(id: u16) -> &'static str {
    VERSIONS
        .iter()
        .find(|(_, known)| *known == id)
        .map(|(name, _)| *name)
        .unwrap_or("unknown")
}

/// Resolve the declarative TLS policy into [`TlsParameters`]
///
/// Fails on the first unrecognized name; no partial parameters are returned.
pub fn resolve_tls_parameters(
    min_version: Option<&str>,
    cipher_suites: &[String],
) -> Result<TlsParameters, TlsError> {
    let min_version = tls_version(min_version.unwrap_or_default())?;
    let cipher_suite_ids = cipher_suites
        .iter()
        .map(|name| cipher_suite(name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TlsParameters {
        min_version,
        cipher_suite_ids,
    })
}

/// Protocol versions rustls should enable for a given minimum.
///
/// rustls implements TLS 1.2 and 1.3 only, so anything below 1.3 enables both.
pub fn protocol_versions(min_version: u16) -> &'static [&'static SupportedProtocolVersion] {
    static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
    static TLS12_AND_UP: &[&SupportedProtocolVersion] =
        &[&rustls::version::TLS13, &rustls::version::TLS12];

    if min_version >= VERSION_TLS13 {
        TLS13_ONLY
    } else {
        TLS12_AND_UP
    }
}

fn is_tls13(suite: &SupportedCipherSuite) -> bool {
    matches!(suite, SupportedCipherSuite::Tls13(_))
}

/// Pick the cipher suites the listener negotiates, preserving declared order
///
/// An empty declaration keeps the provider defaults. Otherwise TLS 1.2
/// negotiation is limited to the declared suites. TLS 1.3 suites are not
/// configurable: undeclared ones are appended after the declared list.
pub fn select_cipher_suites(
    declared: &[u16],
    min_version: u16,
    available: &[SupportedCipherSuite],
) -> Vec<SupportedCipherSuite> {
    if declared.is_empty() {
        return available.to_vec();
    }

    let tls12_enabled = min_version < VERSION_TLS13;
    let mut selected: Vec<SupportedCipherSuite> = Vec::with_capacity(available.len());

    for id in declared {
        let wanted = CipherSuite::from(*id);
        let Some(suite) = available.iter().find(|s| s.suite() == wanted) else {
            warn!(cipher_suite = %format!("{id:#06x}"), "Cipher suite not supported by TLS backend, ignoring");
            continue;
        };
        if !is_tls13(suite) && !tls12_enabled {
            warn!(cipher_suite = ?suite.suite(), "TLS 1.2 cipher suite unused with TLS 1.3 minimum");
            continue;
        }
        if !selected.iter().any(|s| s.suite() == suite.suite()) {
            selected.push(*suite);
        }
    }

    for suite in available.iter().filter(|s| is_tls13(s)) {
        if !selected.iter().any(|s| s.suite() == suite.suite()) {
            selected.push(*suite);
        }
    }

    selected
}

/// Load the PEM certificate chain and private key from disk
pub fn load_certified_key(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    use rustls_pemfile::{certs, private_key};

    let cert_pem = std::fs::read(cert_path).map_err(|source| TlsError::Read {
        path: cert_path.to_path_buf(),
        source,
    })?;
    let key_pem = std::fs::read(key_path).map_err(|source| TlsError::Read {
        path: key_path.to_path_buf(),
        source,
    })?;

    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(cert_pem.as_slice()))
        .filter_map(|r| r.ok())
        .collect();
    if cert_chain.is_empty() {
        return Err(TlsError::InvalidPem(cert_path.to_path_buf()));
    }

    let key = private_key(&mut BufReader::new(key_pem.as_slice()))
        .map_err(|source| TlsError::Read {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::InvalidPem(key_path.to_path_buf()))?;

    Ok((cert_chain, key))
}

/// Build a rustls ServerConfig enforcing the resolved parameters
///
/// The server picks the first mutually supported suite in its own order, so
/// declared order wins over client preference. Only `http/1.1` is offered
/// through ALPN.
pub fn build_rustls_config(
    params: &TlsParameters,
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let defaults = rustls::crypto::ring::default_provider();
    let cipher_suites =
        select_cipher_suites(&params.cipher_suite_ids, params.min_version, &defaults.cipher_suites);
    let provider = CryptoProvider {
        cipher_suites,
        ..defaults
    };

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(protocol_versions(params.min_version))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    config.ignore_client_order = true;
    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

    Ok(Arc::new(config))
}
