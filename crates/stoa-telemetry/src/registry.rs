//! The process-wide entry registry.
//!
//! Interceptor construction resolves an option set per entry name here.
//! Registration is idempotent with first-registration-wins semantics: a
//! second construction for the same entry name returns the existing option
//! set and discards its own configuration (with a warning, so a silent
//! config mismatch is at least visible at startup). This is what prevents
//! duplicate instrument registration and leaked exporters when several
//! routers share one logical entry.
//!
//! The registry is an explicit object owned by process bootstrap and handed
//! to every interceptor builder; there are no module-level singleton maps.
//! Writes happen at construction time, reads on every request, so the maps
//! are concurrency-safe (`DashMap`) rather than lock-guarded by callers.

use crate::metrics::MetricsSet;
use crate::tracing::SharedPropagator;
use dashmap::DashMap;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use std::collections::HashSet;
use std::sync::Arc;
use stoa_core::EntryInfo;

/// Default request-path prefixes excluded from metrics observation.
///
/// Documentation UI, static assets, and health endpoints are internal
/// traffic; observing them skews the business series.
pub const DEFAULT_IGNORED_PREFIXES: [&str; 3] = ["/docs", "/assets", "/healthz"];

/// Resolved metrics configuration for one entry.
#[derive(Debug, Clone)]
pub struct MetricsOptions {
    entry: EntryInfo,
    metrics: MetricsSet,
    ignored_prefixes: Vec<String>,
}

impl MetricsOptions {
    /// Creates the metrics option set for an entry with the default
    /// internal-path exclusions.
    #[must_use]
    pub fn new(entry: EntryInfo) -> Self {
        let metrics = MetricsSet::new(entry.clone());
        Self {
            entry,
            metrics,
            ignored_prefixes: DEFAULT_IGNORED_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Replaces the internal-path exclusion list.
    #[must_use]
    pub fn with_ignored_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.ignored_prefixes = prefixes;
        self
    }

    /// The entry this option set belongs to.
    #[must_use]
    pub fn entry(&self) -> &EntryInfo {
        &self.entry
    }

    /// The entry's metrics set.
    #[must_use]
    pub fn metrics(&self) -> &MetricsSet {
        &self.metrics
    }

    /// Whether a request path is excluded from observation.
    #[must_use]
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_prefixes.iter().any(|p| path.starts_with(p))
    }
}

/// Resolved tracing configuration for one entry.
#[derive(Debug)]
pub struct TracingOptions {
    entry: EntryInfo,
    provider: TracerProvider,
    tracer: Tracer,
    propagator: SharedPropagator,
}

impl TracingOptions {
    /// Creates the tracing option set: the tracer is obtained from the
    /// provider under the entry's name.
    #[must_use]
    pub fn new(entry: EntryInfo, provider: TracerProvider, propagator: SharedPropagator) -> Self {
        use opentelemetry::trace::TracerProvider as _;
        let tracer = provider.tracer(entry.name().to_string());
        Self {
            entry,
            provider,
            tracer,
            propagator,
        }
    }

    /// The entry this option set belongs to.
    #[must_use]
    pub fn entry(&self) -> &EntryInfo {
        &self.entry
    }

    /// The entry's tracer provider.
    #[must_use]
    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// The entry's tracer.
    #[must_use]
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// The entry's propagator.
    #[must_use]
    pub fn propagator(&self) -> SharedPropagator {
        Arc::clone(&self.propagator)
    }

    /// Flushes and shuts down the provider. Export errors are logged;
    /// telemetry failures never propagate.
    pub fn shutdown(&self) {
        for result in self.provider.force_flush() {
            if let Err(e) = result {
                tracing::warn!(entry = %self.entry, error = %e, "trace flush failed");
            }
        }
        if let Err(e) = self.provider.shutdown() {
            tracing::warn!(entry = %self.entry, error = %e, "tracer provider shutdown failed");
        }
    }
}

/// Resolved auth rules for one entry.
///
/// Credential syntax is validated by the bootstrap layer; this holds
/// already-validated allow-lists.
#[derive(Debug, Clone, Default)]
pub struct AuthOptions {
    entry: EntryInfo,
    basic: HashSet<String>,
    bearer: HashSet<String>,
    api_keys: HashSet<String>,
    realm: String,
}

impl AuthOptions {
    /// Creates an empty rule set for an entry.
    #[must_use]
    pub fn new(entry: EntryInfo) -> Self {
        Self {
            entry,
            realm: "stoa".to_string(),
            ..Self::default()
        }
    }

    /// Allows a `user:pass` Basic credential.
    #[must_use]
    pub fn with_basic(mut self, credential: impl Into<String>) -> Self {
        self.basic.insert(credential.into());
        self
    }

    /// Allows a Bearer token.
    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer.insert(token.into());
        self
    }

    /// Allows an API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.insert(key.into());
        self
    }

    /// Sets the challenge realm.
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// The entry this rule set belongs to.
    #[must_use]
    pub fn entry(&self) -> &EntryInfo {
        &self.entry
    }

    /// Configured Basic credentials.
    #[must_use]
    pub fn basic(&self) -> &HashSet<String> {
        &self.basic
    }

    /// Configured Bearer tokens.
    #[must_use]
    pub fn bearer(&self) -> &HashSet<String> {
        &self.bearer
    }

    /// Configured API keys.
    #[must_use]
    pub fn api_keys(&self) -> &HashSet<String> {
        &self.api_keys
    }

    /// The challenge realm.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }
}

/// Process-wide mapping from entry name to per-kind option sets.
#[derive(Debug, Default)]
pub struct EntryRegistry {
    metrics: DashMap<String, Arc<MetricsOptions>>,
    tracing: DashMap<String, Arc<TracingOptions>>,
    auth: DashMap<String, Arc<AuthOptions>>,
}

impl EntryRegistry {
    /// Creates an empty registry, ready to be shared across interceptor
    /// builders.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the metrics option set for `entry`, constructing it via
    /// `factory` only if the entry is not yet registered.
    pub fn metrics_or_register(
        &self,
        entry: &EntryInfo,
        factory: impl FnOnce() -> MetricsOptions,
    ) -> Arc<MetricsOptions> {
        register_or_get(&self.metrics, "metrics", entry, factory)
    }

    /// Looks up the metrics option set for an entry name.
    #[must_use]
    pub fn metrics_for(&self, entry_name: &str) -> Option<Arc<MetricsOptions>> {
        self.metrics.get(entry_name).map(|v| Arc::clone(v.value()))
    }

    /// Returns the tracing option set for `entry`, constructing it via
    /// `factory` only if the entry is not yet registered.
    pub fn tracing_or_register(
        &self,
        entry: &EntryInfo,
        factory: impl FnOnce() -> TracingOptions,
    ) -> Arc<TracingOptions> {
        register_or_get(&self.tracing, "tracing", entry, factory)
    }

    /// Looks up the tracing option set for an entry name.
    #[must_use]
    pub fn tracing_for(&self, entry_name: &str) -> Option<Arc<TracingOptions>> {
        self.tracing.get(entry_name).map(|v| Arc::clone(v.value()))
    }

    /// Returns the auth option set for `entry`, constructing it via
    /// `factory` only if the entry is not yet registered.
    pub fn auth_or_register(
        &self,
        entry: &EntryInfo,
        factory: impl FnOnce() -> AuthOptions,
    ) -> Arc<AuthOptions> {
        register_or_get(&self.auth, "auth", entry, factory)
    }

    /// Looks up the auth option set for an entry name.
    #[must_use]
    pub fn auth_for(&self, entry_name: &str) -> Option<Arc<AuthOptions>> {
        self.auth.get(entry_name).map(|v| Arc::clone(v.value()))
    }

    /// Flushes and shuts down every registered tracer provider.
    ///
    /// Must be called during process teardown (normally via the telemetry
    /// guard) or buffered spans are lost.
    pub fn shutdown(&self) {
        for item in &self.tracing {
            item.value().shutdown();
        }
    }
}

fn register_or_get<T>(
    map: &DashMap<String, Arc<T>>,
    kind: &'static str,
    entry: &EntryInfo,
    factory: impl FnOnce() -> T,
) -> Arc<T> {
    if map.contains_key(entry.name()) {
        tracing::warn!(
            entry = %entry,
            kind,
            "option set already registered for entry; reusing existing configuration"
        );
    }
    Arc::clone(
        map.entry(entry.name().to_string())
            .or_insert_with(|| Arc::new(factory()))
            .value(),
    )
}
