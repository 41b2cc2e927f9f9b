//! Prometheus metrics for the image registry operator
//!
//! A fixed catalogue of counters and gauges, registered once into a
//! process-wide registry and mutated only through the setters below.
//! Label values come from closed sets so cardinality never grows.
//!
//! ## Metrics
//! - `image_registry_operator_storage_reconfigured_total` - storage reconfigurations
//! - `image_registry_operator_image_pruner_install_status` - 0 absent, 1 disabled, 2 enabled
//! - `image_registry_operator_image_stream_tags` - tags by source and location
//! - `image_registry_operator_storage_type` - storage backends observed
//! - `image_registry_operator_azure_key_cache_requests_total` - Azure key cache lookups

use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;

const NAMESPACE: &str = "image_registry";
const SUBSYSTEM: &str = "operator";

/// Content type of the text exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Storage backends the registry can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Gcs,
    Swift,
    Pvc,
    Azure,
    IbmCos,
    Oss,
    EmptyDir,
}

impl StorageBackend {
    /// Label value used in the `storage` label
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::S3 => "S3",
            StorageBackend::Gcs => "GCS",
            StorageBackend::Swift => "Swift",
            StorageBackend::Pvc => "PVC",
            StorageBackend::Azure => "Azure",
            StorageBackend::IbmCos => "IBMCOS",
            StorageBackend::Oss => "OSS",
            StorageBackend::EmptyDir => "EmptyDir",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an image stream tag lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLocation {
    /// `openshift*` namespaces
    OpenShift,
    /// Every other namespace
    Other,
}

impl TagLocation {
    fn as_str(&self) -> &'static str {
        match self {
            TagLocation::OpenShift => "openshift",
            TagLocation::Other => "other",
        }
    }
}

/// Operator metrics, backed by their own registry
pub struct OperatorMetrics {
    registry: Registry,
    storage_reconfigured: IntCounter,
    image_pruner_install_status: Gauge,
    image_stream_tags: GaugeVec,
    storage_type: GaugeVec,
    azure_key_cache: IntCounterVec,
}

impl OperatorMetrics {
    /// Create the catalogue and register it into a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let storage_reconfigured = IntCounter::with_opts(
            Opts::new(
                "storage_reconfigured_total",
                "Number of times the operator reconfigured its storage",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(storage_reconfigured.clone()))?;

        let image_pruner_install_status = Gauge::with_opts(
            Opts::new(
                "image_pruner_install_status",
                "Image pruner state: 0 not installed, 1 installed but disabled, 2 enabled",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(image_pruner_install_status.clone()))?;

        let image_stream_tags = GaugeVec::new(
            Opts::new(
                "image_stream_tags",
                "Number of image stream tags by source and location",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
            &["source", "location"],
        )?;
        registry.register(Box::new(image_stream_tags.clone()))?;

        let storage_type = GaugeVec::new(
            Opts::new("storage_type", "Storage backends reported by the operator")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["storage"],
        )?;
        registry.register(Box::new(storage_type.clone()))?;

        let azure_key_cache = IntCounterVec::new(
            Opts::new(
                "azure_key_cache_requests_total",
                "Azure storage account key cache lookups by result",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
            &["result"],
        )?;
        registry.register(Box::new(azure_key_cache.clone()))?;

        Ok(Self {
            registry,
            storage_reconfigured,
            image_pruner_install_status,
            image_stream_tags,
            storage_type,
            azure_key_cache,
        })
    }

    /// Count one storage reconfiguration
    pub fn storage_reconfigured(&self) {
        self.storage_reconfigured.inc();
    }

    /// Current storage reconfiguration count
    pub fn storage_reconfigured_count(&self) -> u64 {
        self.storage_reconfigured.get()
    }

    /// Record the image pruner install state
    pub fn image_pruner_install_status(&self, installed: bool, enabled: bool) {
        let value = match (installed, enabled) {
            (false, _) => 0.0,
            (true, false) => 1.0,
            (true, true) => 2.0,
        };
        self.image_pruner_install_status.set(value);
    }

    /// Current image pruner install state
    pub fn image_pruner_install_status_value(&self) -> f64 {
        self.image_pruner_install_status.get()
    }

    /// Record imported and pushed tag totals for one location
    pub fn report_image_stream_tags(&self, location: TagLocation, imported: f64, pushed: f64) {
        self.image_stream_tags
            .with_label_values(&["imported", location.as_str()])
            .set(imported);
        self.image_stream_tags
            .with_label_values(&["pushed", location.as_str()])
            .set(pushed);
    }

    /// Mark a storage backend as observed
    ///
    /// Backends reported earlier keep their series at 1.
    pub fn report_storage_type(&self, backend: StorageBackend) {
        self.storage_type
            .with_label_values(&[backend.as_str()])
            .set(1.0);
    }

    /// Count an Azure key cache hit
    pub fn azure_key_cache_hit(&self) {
        self.azure_key_cache.with_label_values(&["hit"]).inc();
    }

    /// Count an Azure key cache miss
    pub fn azure_key_cache_miss(&self) {
        self.azure_key_cache.with_label_values(&["miss"]).inc();
    }

    /// Encode all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

lazy_static! {
    static ref METRICS: OperatorMetrics =
        OperatorMetrics::new().expect("operator metrics register into a fresh registry");
}

/// The process-wide metrics instance
pub fn global() -> &'static OperatorMetrics {
    &METRICS
}

/// Count one storage reconfiguration; flapping storage shows up as a steep rate
pub fn storage_reconfigured() {
    global().storage_reconfigured();
}

/// Report the install state of the automatic image pruner
pub fn image_pruner_install_status(installed: bool, enabled: bool) {
    global().image_pruner_install_status(installed, enabled);
}

/// Report image stream tags seen in the openshift namespaces
pub fn report_openshift_image_stream_tags(imported: f64, pushed: f64) {
    global().report_image_stream_tags(TagLocation::OpenShift, imported, pushed);
}

/// Report image stream tags seen outside the openshift namespaces
pub fn report_other_image_stream_tags(imported: f64, pushed: f64) {
    global().report_image_stream_tags(TagLocation::Other, imported, pushed);
}

/// Report the storage backend in use
pub fn report_storage_type(backend: StorageBackend) {
    global().report_storage_type(backend);
}

/// Count an Azure storage key served from cache
pub fn azure_key_cache_hit() {
    global().azure_key_cache_hit();
}

/// Count an Azure storage key cache miss
pub fn azure_key_cache_miss() {
    global().azure_key_cache_miss();
}
