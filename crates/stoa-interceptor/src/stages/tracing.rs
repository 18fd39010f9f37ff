//! Tracing interceptor.
//!
//! Starts a server span per request, joining any trace context carried in
//! the incoming headers, and ends the span with the request outcome. The
//! tracer, active span context, propagator, and provider are attached to
//! the request context so handler code can start child spans and inject the
//! trace into outgoing calls.
//!
//! Construction resolves the entry's tracing option set through the
//! registry; building the interceptor twice for the same entry reuses the
//! first provider instead of leaking a second exporter.

use crate::context::{RequestContext, TraceBinding, TRACE_ID_HEADER};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{Request, Response};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, URL_PATH,
};
use std::sync::Arc;
use stoa_core::EntryInfo;
use stoa_telemetry::tracing::{build_tracer_provider, default_propagator, extract_context};
use stoa_telemetry::{
    EntryRegistry, SharedPropagator, SpanExporterKind, TelemetryResult, TracingOptions,
};

/// Interceptor that traces requests for one entry.
#[derive(Debug, Clone)]
pub struct TracingInterceptor {
    options: Arc<TracingOptions>,
}

impl TracingInterceptor {
    /// Creates a builder for the tracing interceptor.
    #[must_use]
    pub fn builder(registry: Arc<EntryRegistry>, entry: EntryInfo) -> TracingInterceptorBuilder {
        TracingInterceptorBuilder {
            registry,
            entry,
            exporter: SpanExporterKind::default(),
            propagator: None,
        }
    }

    /// The resolved option set.
    #[must_use]
    pub fn options(&self) -> &Arc<TracingOptions> {
        &self.options
    }
}

/// Builder for [`TracingInterceptor`].
pub struct TracingInterceptorBuilder {
    registry: Arc<EntryRegistry>,
    entry: EntryInfo,
    exporter: SpanExporterKind,
    propagator: Option<SharedPropagator>,
}

impl TracingInterceptorBuilder {
    /// Selects the span exporter (no-op by default).
    #[must_use]
    pub fn exporter(mut self, exporter: SpanExporterKind) -> Self {
        self.exporter = exporter;
        self
    }

    /// Supplies a custom propagator instead of the default
    /// trace-context + baggage composite.
    #[must_use]
    pub fn propagator(mut self, propagator: SharedPropagator) -> Self {
        self.propagator = Some(propagator);
        self
    }

    /// Builds the interceptor, registering the entry's tracing option set if
    /// it does not exist yet. For an already-registered entry the existing
    /// option set wins and no new provider is constructed.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError` when the exporter cannot be constructed.
    pub fn build(self) -> TelemetryResult<TracingInterceptor> {
        if let Some(existing) = self.registry.tracing_for(self.entry.name()) {
            ::tracing::warn!(
                entry = %self.entry,
                "tracing option set already registered for entry; reusing existing configuration"
            );
            return Ok(TracingInterceptor { options: existing });
        }

        let provider = build_tracer_provider(&self.entry, &self.exporter)?;
        let propagator = self.propagator.unwrap_or_else(default_propagator);
        let options = self.registry.tracing_or_register(&self.entry, || {
            TracingOptions::new(self.entry.clone(), provider, propagator)
        });

        Ok(TracingInterceptor { options })
    }
}

impl Interceptor for TracingInterceptor {
    fn name(&self) -> &'static str {
        "tracing"
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

            let propagator = self.options.propagator();
            let parent_cx = extract_context(propagator.as_ref(), ctx.incoming_headers());

            let method = ctx
                .method()
                .map_or_else(|| "UNKNOWN".to_string(), ToString::to_string);
            let path = ctx.path().unwrap_or("/").to_string();

            let span = self
                .options
                .tracer()
                .span_builder(format!("{method} {path}"))
                .with_kind(SpanKind::Server)
                .with_attributes([
                    KeyValue::new(HTTP_REQUEST_METHOD, method),
                    KeyValue::new(URL_PATH, path),
                ])
                .start_with_context(self.options.tracer(), &parent_cx);

            let span_cx = parent_cx.with_span(span);

            let trace_id = {
                let span = span_cx.span();
                let span_context = span.span_context();
                if span_context.is_valid() {
                    span_context.trace_id().to_string()
                } else {
                    String::new()
                }
            };
            if !trace_id.is_empty() {
                ctx.set_response_header(TRACE_ID_HEADER, &trace_id);
                ctx.event().write().set_trace_id(trace_id);
            }

            ctx.set_trace(TraceBinding {
                span_cx: span_cx.clone(),
                tracer: self.options.tracer().clone(),
                propagator,
                provider: self.options.provider().clone(),
            });

            let scope = SpanScope::new(span_cx.clone());
            let response = next.run(ctx, request).await;

            let status = response.status();
            {
                let span = span_cx.span();
                span.set_attribute(KeyValue::new(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(status.as_u16()),
                ));
                if status.is_client_error() || status.is_server_error() {
                    span.set_status(Status::error(
                        status.canonical_reason().unwrap_or("request failed"),
                    ));
                } else {
                    span.set_status(Status::Ok);
                }
            }
            scope.complete();

            response
        })
    }
}

/// Guard that ends the span on every exit path of the tracing stage.
///
/// On the normal path the stage sets the final status and calls
/// [`SpanScope::complete`]. If the stage's post-logic never runs - a panic
/// unwinding through, or an enclosing timeout dropping the chain - `Drop`
/// ends the span with an error status so it still reaches the exporter.
struct SpanScope {
    span_cx: opentelemetry::Context,
    completed: bool,
}

impl SpanScope {
    fn new(span_cx: opentelemetry::Context) -> Self {
        Self {
            span_cx,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
        self.span_cx.span().end();
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let span = self.span_cx.span();
        span.set_status(Status::error("request aborted before span completion"));
        span.end();
    }
}

/// Injects the active span's context into an outgoing request's headers,
/// using the propagator the tracing stage attached. A no-op when no tracing
/// interceptor is installed.
pub fn inject_trace_context(ctx: &RequestContext, headers: &mut http::HeaderMap) {
    let propagator = ctx.propagator();
    stoa_telemetry::tracing::inject_context(propagator.as_ref(), &ctx.span(), headers);
}

/// Starts a named child span of the request's active span and returns the
/// context carrying it. Callers end the child by calling
/// `cx.span().end()`. With no tracing interceptor installed the returned
/// span is non-recording.
#[must_use]
pub fn start_child_span(ctx: &RequestContext, name: &str) -> opentelemetry::Context {
    let parent_cx = ctx.span();
    let span = ctx
        .tracer()
        .start_with_context(name.to_string(), &parent_cx);
    parent_cx.with_span(span)
}
