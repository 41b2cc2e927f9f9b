//! Controller configuration file
//!
//! The operator reads a `GenericOperatorConfig`-style YAML document and only
//! uses its `servingInfo` block:
//!
//! ```yaml
//! apiVersion: operator.openshift.io/v1alpha1
//! kind: GenericOperatorConfig
//! servingInfo:
//!   bindAddress: "0.0.0.0:60000"
//!   minTLSVersion: VersionTLS12
//!   cipherSuites:
//!   - TLS_AES_128_GCM_SHA256
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bind address used when no controller config file is given
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:60000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unmarshal config content from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Listener settings for the metrics endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServingConfig {
    pub bind_address: String,
    #[serde(rename = "minTLSVersion")]
    pub min_tls_version: Option<String>,
    pub cipher_suites: Vec<String>,
}

/// Top-level controller config document
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    pub api_version: Option<String>,
    pub kind: Option<String>,
    pub serving_info: ServingConfig,
}

impl ControllerConfig {
    /// Config used when no file is supplied
    pub fn builtin() -> Self {
        Self {
            serving_info: ServingConfig {
                bind_address: DEFAULT_BIND_ADDRESS.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Parse a controller config document
pub fn parse_controller_config(content: &str, origin: &Path) -> Result<ControllerConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })
}

/// Read the controller config from `path`, or return the built-in default
/// when no path (or an empty one) is given
///
/// An unreadable or malformed file is an error; it never falls back to the
/// default.
pub fn load_controller_config(path: Option<&Path>) -> Result<ControllerConfig, ConfigError> {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(ControllerConfig::builtin());
    };

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_controller_config(&content, path)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
