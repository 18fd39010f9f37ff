//! Per-entry telemetry for the Stoa interceptor pipeline.
//!
//! This crate provides the telemetry state the interceptors publish into:
//!
//! - **Events**: one structured record per request, closed exactly once
//! - **Metrics**: per-entry metrics sets in Prometheus exposition via the
//!   `metrics` facade
//! - **Tracing**: per-entry OpenTelemetry tracer providers with pluggable
//!   span exporters and W3C context propagation
//! - **Registry**: the process-wide, entry-keyed map of option sets with
//!   idempotent get-or-create registration
//!
//! # Architecture
//!
//! ```text
//!            interceptor construction (startup)
//!                          |
//!                          v
//!                  +---------------+
//!                  | EntryRegistry |  entry name -> option set
//!                  +---------------+
//!                   /      |      \
//!                  v       v       v
//!          MetricsOptions  TracingOptions  AuthOptions
//!           (MetricsSet)   (provider,      (allow-lists)
//!                           tracer,
//!                           propagator)
//!                          |
//!            request workers read concurrently
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use stoa_telemetry::{init_telemetry, EntryRegistry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = EntryRegistry::new();
//!     let config = TelemetryConfig::builder()
//!         .service_name("user-api")
//!         .service_version("1.0.0")
//!         .build();
//!
//!     let _guard = init_telemetry(&config, registry.clone()).expect("telemetry init");
//!
//!     // Build interceptors against `registry`...
//!     // Dropping the guard at shutdown flushes every entry's exporter.
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/stoa-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod tracing;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use event::{Event, EventState, SharedEvent};
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig, MetricsSet, RequestLabels};
pub use registry::{AuthOptions, EntryRegistry, MetricsOptions, TracingOptions};
pub use tracing::{SharedPropagator, SpanExporterKind};

use std::sync::Arc;
use stoa_core::AppInfo;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Guard that shuts down per-entry telemetry on drop.
///
/// Keep this alive for the lifetime of the process. Dropping it flushes and
/// shuts down every tracer provider registered in the entry registry, so
/// buffered spans are not lost at teardown.
pub struct TelemetryGuard {
    registry: Arc<EntryRegistry>,
}

impl TelemetryGuard {
    /// Creates a guard over a registry.
    #[must_use]
    pub fn new(registry: Arc<EntryRegistry>) -> Self {
        Self { registry }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}

/// Initializes the process-wide telemetry subsystems.
///
/// Installs the application identity, the logging subscriber, and the
/// metrics recorder, and returns a guard that flushes every registered
/// entry's exporters when dropped.
///
/// # Errors
///
/// Returns `TelemetryError` if logging or metrics initialization fails.
pub fn init_telemetry(
    config: &TelemetryConfig,
    registry: Arc<EntryRegistry>,
) -> TelemetryResult<TelemetryGuard> {
    AppInfo::init(config.service_name.clone(), config.service_version.clone());

    logging::init_logging(&config.logging)?;
    metrics::init_metrics(&config.metrics)?;

    Ok(TelemetryGuard::new(registry))
}
