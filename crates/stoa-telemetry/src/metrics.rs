//! Per-entry request metrics.
//!
//! Every entry owns a [`MetricsSet`] with three instruments, all keyed by the
//! same fixed, ordered 13-label tuple:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `elapsedNano` | Summary | Request latency in nanoseconds |
//! | `errors` | Counter | Requests that recorded at least one error |
//! | `resCode` | Counter | Responses by status code |
//!
//! The Prometheus exporter renders `histogram!` observations as summaries
//! with quantiles unless buckets are configured, which is exactly the
//! exposition `elapsedNano` wants.
//!
//! Label values that cannot be resolved are substituted with the
//! [`UNKNOWN`] sentinel, never omitted: every observation carries exactly
//! 13 values.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{describe_counter, describe_histogram, Counter, Histogram, Label, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Once, OnceLock};
use stoa_core::{AppInfo, DeploymentFacts, EntryInfo, UNKNOWN};

/// Latency summary metric name.
pub const ELAPSED_NANO: &str = "elapsedNano";

/// Error counter metric name.
pub const ERRORS: &str = "errors";

/// Response-code counter metric name.
pub const RES_CODE: &str = "resCode";

/// Label value identifying the server flavor producing these observations.
pub const SERVER_KIND: &str = "stoaServer";

/// The fixed, ordered label key tuple shared by all three instruments.
pub const LABEL_KEYS: [&str; 13] = [
    "entryName",
    "entryType",
    "realm",
    "region",
    "az",
    "domain",
    "instanceHost",
    "appVersion",
    "appName",
    "httpMethod",
    "httpPath",
    "serverKind",
    "responseCode",
];

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// One-time instrument descriptions.
static DESCRIBE: Once = Once::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Summary quantiles for latency exposition.
    pub quantiles: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quantiles: vec![0.5, 0.9, 0.99],
        }
    }
}

/// Initializes the process-wide metrics recorder.
///
/// The scrape endpoint itself is the host process's responsibility; this
/// installs the recorder and keeps a handle for [`render_metrics`].
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the quantile set is rejected or
/// a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_quantiles(&config.quantiles)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Renders all metrics in Prometheus text format.
///
/// Returns `None` if metrics were never initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Fully resolved label values for one observation.
///
/// Resolution happens at observation time: request facts come from the live
/// request/response, deployment facts from the process environment, and any
/// unresolvable value degrades to [`UNKNOWN`] per label.
#[derive(Debug, Clone)]
pub struct RequestLabels {
    values: [String; 13],
}

impl RequestLabels {
    /// Resolves label values for one observation.
    #[must_use]
    pub fn resolve(
        entry: &EntryInfo,
        method: Option<&http::Method>,
        path: Option<&str>,
        res_code: Option<u16>,
    ) -> Self {
        let app = AppInfo::global();
        let deploy = DeploymentFacts::global();

        let values = [
            entry.name().to_string(),
            entry.kind().to_string(),
            deploy.realm.clone(),
            deploy.region.clone(),
            deploy.az.clone(),
            deploy.domain.clone(),
            deploy.instance.clone(),
            app.version.clone(),
            app.name.clone(),
            method.map_or_else(|| UNKNOWN.to_string(), ToString::to_string),
            path.map_or_else(|| UNKNOWN.to_string(), ToString::to_string),
            SERVER_KIND.to_string(),
            res_code.map_or_else(|| UNKNOWN.to_string(), |c| c.to_string()),
        ];

        Self { values }
    }

    /// The 13 resolved values, in [`LABEL_KEYS`] order.
    #[must_use]
    pub fn values(&self) -> &[String; 13] {
        &self.values
    }

    fn to_metric_labels(&self) -> Vec<Label> {
        LABEL_KEYS
            .iter()
            .zip(self.values.iter())
            .map(|(key, value)| Label::new(*key, value.clone()))
            .collect()
    }
}

/// The bundle of latency/error/response-code instruments for one entry.
///
/// Instruments are described once per process; per-entry isolation is
/// carried by the `entryName`/`entryType` labels, so two entries observing
/// through their own sets never touch each other's series.
#[derive(Debug, Clone)]
pub struct MetricsSet {
    entry: EntryInfo,
}

impl MetricsSet {
    /// Creates the metrics set for an entry, registering instrument
    /// descriptions on first use.
    #[must_use]
    pub fn new(entry: EntryInfo) -> Self {
        DESCRIBE.call_once(|| {
            describe_histogram!(
                ELAPSED_NANO,
                Unit::Nanoseconds,
                "Request elapsed time in nanoseconds"
            );
            describe_counter!(ERRORS, "Requests that recorded at least one error");
            describe_counter!(RES_CODE, "Responses by status code");
        });
        Self { entry }
    }

    /// The entry this set belongs to.
    #[must_use]
    pub fn entry(&self) -> &EntryInfo {
        &self.entry
    }

    /// The latency observer for the given label values.
    #[must_use]
    pub fn latency(&self, labels: &RequestLabels) -> Histogram {
        metrics::histogram!(ELAPSED_NANO, labels.to_metric_labels())
    }

    /// The error counter for the given label values.
    #[must_use]
    pub fn error_counter(&self, labels: &RequestLabels) -> Counter {
        metrics::counter!(ERRORS, labels.to_metric_labels())
    }

    /// The response-code counter for the given label values.
    #[must_use]
    pub fn res_code_counter(&self, labels: &RequestLabels) -> Counter {
        metrics::counter!(RES_CODE, labels.to_metric_labels())
    }
}
