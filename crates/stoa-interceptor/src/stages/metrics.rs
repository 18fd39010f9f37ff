//! Metrics interceptor.
//!
//! Records request latency, response-code counts, and error counts into the
//! entry's metrics set, labeled by the fixed 13-value tuple. Construction
//! resolves the entry's option set through the registry, so building the
//! interceptor twice for the same entry reuses one metrics set instead of
//! registering twice.
//!
//! Internal, non-business paths (documentation UI, static assets, health
//! endpoints) are excluded from observation so the instruments measure only
//! business traffic.

use crate::context::RequestContext;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{Request, Response};
use metrics::{Counter, Histogram};
use std::sync::Arc;
use std::time::Instant;
use stoa_core::EntryInfo;
use stoa_telemetry::{EntryRegistry, MetricsOptions, RequestLabels};

/// Interceptor that observes request metrics for one entry.
#[derive(Debug, Clone)]
pub struct MetricsInterceptor {
    options: Arc<MetricsOptions>,
}

impl MetricsInterceptor {
    /// Creates the metrics interceptor for an entry, resolving or
    /// registering its option set in the registry.
    #[must_use]
    pub fn new(registry: &EntryRegistry, entry: EntryInfo) -> Self {
        let options = registry.metrics_or_register(&entry, || MetricsOptions::new(entry.clone()));
        Self { options }
    }

    /// Creates the metrics interceptor with a caller-supplied option set.
    /// If the entry is already registered, the existing option set wins and
    /// `options` is discarded.
    #[must_use]
    pub fn with_options(registry: &EntryRegistry, options: MetricsOptions) -> Self {
        let entry = options.entry().clone();
        let options = registry.metrics_or_register(&entry, || options);
        Self { options }
    }

    /// The resolved option set.
    #[must_use]
    pub fn options(&self) -> &Arc<MetricsOptions> {
        &self.options
    }
}

impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if ctx.entry_name().is_empty() {
                ctx.set_entry(self.options.entry().clone());
            }

            let start = Instant::now();
            let response = next.run(ctx, request).await;
            let elapsed = start.elapsed();

            let path = ctx.path().unwrap_or("");
            if !self.options.is_ignored(path) {
                ctx.set_response_code(response.status().as_u16());
                let labels = RequestLabels::resolve(
                    self.options.entry(),
                    ctx.method(),
                    ctx.path(),
                    Some(response.status().as_u16()),
                );

                let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
                #[allow(clippy::cast_precision_loss)]
                self.options
                    .metrics()
                    .latency(&labels)
                    .record(nanos as f64);
                self.options.metrics().res_code_counter(&labels).increment(1);
                if ctx.event().read().error_count() > 0 {
                    self.options.metrics().error_counter(&labels).increment(1);
                }
            }

            response
        })
    }
}

/// The latency observer bound to the request's current label values, or
/// `None` when no metrics interceptor is registered for the context's
/// entry. `None` means "metrics disabled", not an error.
#[must_use]
pub fn server_duration_metrics(
    registry: &EntryRegistry,
    ctx: &RequestContext,
) -> Option<Histogram> {
    let options = registry.metrics_for(ctx.entry_name())?;
    Some(options.metrics().latency(&context_labels(&options, ctx)))
}

/// The error counter bound to the request's current label values, or
/// `None` when no metrics interceptor is registered for the context's
/// entry.
#[must_use]
pub fn server_error_metrics(registry: &EntryRegistry, ctx: &RequestContext) -> Option<Counter> {
    let options = registry.metrics_for(ctx.entry_name())?;
    Some(
        options
            .metrics()
            .error_counter(&context_labels(&options, ctx)),
    )
}

/// The response-code counter bound to the request's current label values,
/// or `None` when no metrics interceptor is registered for the context's
/// entry.
#[must_use]
pub fn server_res_code_metrics(registry: &EntryRegistry, ctx: &RequestContext) -> Option<Counter> {
    let options = registry.metrics_for(ctx.entry_name())?;
    Some(
        options
            .metrics()
            .res_code_counter(&context_labels(&options, ctx)),
    )
}

fn context_labels(options: &MetricsOptions, ctx: &RequestContext) -> RequestLabels {
    RequestLabels::resolve(
        options.entry(),
        ctx.method(),
        ctx.path(),
        ctx.response_code(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;
    use metrics_exporter_prometheus::PrometheusBuilder;

    fn test_request(path: &str) -> Request {
        HttpRequest::builder()
            .method("GET")
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok_handler(
    ) -> impl FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send {
        |_ctx, _req| {
            Box::pin(async {
                HttpResponse::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from("OK")))
                    .unwrap()
            })
        }
    }

    fn run_through_stage(stage: &MetricsInterceptor, path: &str) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut ctx = RequestContext::new();
            let request = test_request(path);
            ctx.seed_from_request(&request);
            let _response = stage
                .process(&mut ctx, request, Next::handler(ok_handler()))
                .await;
        });
    }

    #[test]
    fn test_construction_is_idempotent_per_entry() {
        let registry = EntryRegistry::new();
        let entry = EntryInfo::new("ut-metrics-idem", "http");
        let first = MetricsInterceptor::new(&registry, entry.clone());
        let second = MetricsInterceptor::new(&registry, entry);
        assert!(Arc::ptr_eq(first.options(), second.options()));
    }

    #[test]
    fn test_observation_carries_entry_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let registry = EntryRegistry::new();
            let stage =
                MetricsInterceptor::new(&registry, EntryInfo::new("ut-metrics-obs", "http"));
            run_through_stage(&stage, "/svc/hello");
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"entryName="ut-metrics-obs""#));
        assert!(rendered.contains(r#"httpPath="/svc/hello""#));
        assert!(rendered.contains(r#"responseCode="200""#));
    }

    #[test]
    fn test_internal_paths_are_not_observed() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let registry = EntryRegistry::new();
            let stage =
                MetricsInterceptor::new(&registry, EntryInfo::new("ut-metrics-int", "http"));
            run_through_stage(&stage, "/docs/index.html");
            run_through_stage(&stage, "/assets/app.css");
            run_through_stage(&stage, "/healthz");
        });

        let rendered = handle.render();
        assert!(!rendered.contains("ut-metrics-int"));
    }

    #[test]
    fn test_accessors_return_none_for_unregistered_entry() {
        let registry = EntryRegistry::new();
        let ctx = RequestContext::new();
        assert!(server_duration_metrics(&registry, &ctx).is_none());
        assert!(server_error_metrics(&registry, &ctx).is_none());
        assert!(server_res_code_metrics(&registry, &ctx).is_none());
    }

    #[test]
    fn test_accessors_return_instruments_for_registered_entry() {
        let recorder = PrometheusBuilder::new().build_recorder();

        metrics::with_local_recorder(&recorder, || {
            let registry = EntryRegistry::new();
            let entry = EntryInfo::new("ut-metrics-acc", "http");
            let _stage = MetricsInterceptor::new(&registry, entry.clone());

            let mut ctx = RequestContext::new();
            ctx.set_entry(entry);
            assert!(server_duration_metrics(&registry, &ctx).is_some());
            assert!(server_error_metrics(&registry, &ctx).is_some());
            assert!(server_res_code_metrics(&registry, &ctx).is_some());
        });
    }
}
