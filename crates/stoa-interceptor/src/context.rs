//! The request context carrier.
//!
//! A [`RequestContext`] travels through the interceptor chain with each
//! request. Stages derive state (event, logger, span, entry identity), store
//! it here, and downstream stages or handler code read it back through the
//! accessors.
//!
//! Every accessor honors the no-op contract: stages are optional and
//! independently composable, so a getter must never assume a particular
//! upstream stage ran. When a field was never populated the getter returns a
//! typed, inert default - a no-op event, a disabled logger span, a
//! non-recording trace context, empty identity strings - never an error and
//! never a panic.

use crate::types::Request;
use opentelemetry::trace::TraceContextExt;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Instant;
use stoa_core::{EntryInfo, RequestId};
use stoa_telemetry::event::Event;
use stoa_telemetry::tracing::{noop_propagator, noop_tracer, noop_tracer_provider};
use stoa_telemetry::{SharedEvent, SharedPropagator};

/// Response header carrying the request id back to the client.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Response header carrying the trace id back to the client.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Tracing state attached to a request by the tracing interceptor.
#[derive(Debug, Clone)]
pub struct TraceBinding {
    /// The context carrying the active server span.
    pub span_cx: opentelemetry::Context,
    /// The entry's tracer.
    pub tracer: Tracer,
    /// The entry's propagator.
    pub propagator: SharedPropagator,
    /// The entry's tracer provider.
    pub provider: TracerProvider,
}

/// Per-request state threaded through the interceptor chain.
pub struct RequestContext {
    entry: Option<EntryInfo>,
    request_id: Option<RequestId>,
    event: Option<SharedEvent>,
    logger: Option<tracing::Span>,
    trace: Option<TraceBinding>,

    method: Option<http::Method>,
    path: Option<String>,
    query: Option<String>,
    protocol: Option<String>,
    user_agent: Option<String>,
    remote_addr: Option<String>,
    response_code: Option<u16>,

    incoming_headers: http::HeaderMap,
    response_headers: http::HeaderMap,

    started_at: Instant,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    /// Creates an empty context. Every getter returns its no-op default
    /// until a stage populates the corresponding field.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entry: None,
            request_id: None,
            event: None,
            logger: None,
            trace: None,
            method: None,
            path: None,
            query: None,
            protocol: None,
            user_agent: None,
            remote_addr: None,
            response_code: None,
            incoming_headers: http::HeaderMap::new(),
            response_headers: http::HeaderMap::new(),
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Captures request metadata into the context: method, path, query,
    /// protocol, user agent, remote address (from `x-forwarded-for`), and a
    /// snapshot of the incoming headers.
    ///
    /// The pipeline calls this before the first stage runs so every stage
    /// can read request facts without holding the request itself.
    pub fn seed_from_request(&mut self, request: &Request) {
        self.method = Some(request.method().clone());
        self.path = Some(request.uri().path().to_string());
        self.query = request.uri().query().map(ToString::to_string);
        self.protocol = Some(format!("{:?}", request.version()));
        self.user_agent = request
            .headers()
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        self.remote_addr = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        self.incoming_headers = request.headers().clone();
    }

    // ------------------------------------------------------------------
    // Entry identity
    // ------------------------------------------------------------------

    /// Sets the entry identity. Called by the first stage that owns one.
    pub fn set_entry(&mut self, entry: EntryInfo) {
        self.entry = Some(entry);
    }

    /// The entry name, or `""` when no stage attached an entry.
    #[must_use]
    pub fn entry_name(&self) -> &str {
        self.entry.as_ref().map_or("", EntryInfo::name)
    }

    /// The entry kind, or `""` when no stage attached an entry.
    #[must_use]
    pub fn entry_kind(&self) -> &str {
        self.entry.as_ref().map_or("", EntryInfo::kind)
    }

    /// The entry identity, if one was attached.
    #[must_use]
    pub fn entry(&self) -> Option<&EntryInfo> {
        self.entry.as_ref()
    }

    // ------------------------------------------------------------------
    // Request id / trace id
    // ------------------------------------------------------------------

    /// Sets the request id. Called by the event interceptor.
    pub fn set_request_id(&mut self, id: RequestId) {
        self.request_id = Some(id);
    }

    /// The request id as a string, or `""` when no event interceptor ran.
    #[must_use]
    pub fn request_id(&self) -> String {
        self.request_id.map(|id| id.to_string()).unwrap_or_default()
    }

    /// The active trace id as a hex string, or `""` when there is no valid
    /// span context.
    #[must_use]
    pub fn trace_id(&self) -> String {
        match &self.trace {
            Some(binding) => {
                let span_cx = binding.span_cx.span();
                let span_context = span_cx.span_context();
                if span_context.is_valid() {
                    span_context.trace_id().to_string()
                } else {
                    String::new()
                }
            }
            None => String::new(),
        }
    }

    // ------------------------------------------------------------------
    // Event and logger
    // ------------------------------------------------------------------

    /// Attaches the request event.
    pub fn set_event(&mut self, event: SharedEvent) {
        self.event = Some(event);
    }

    /// The active event, or a fresh inert event when no event interceptor
    /// is installed. Writes to the inert event are accepted and discarded.
    #[must_use]
    pub fn event(&self) -> SharedEvent {
        self.event.clone().unwrap_or_else(Event::noop_shared)
    }

    /// Attaches the request-scoped logger span.
    pub fn set_logger(&mut self, span: tracing::Span) {
        self.logger = Some(span);
    }

    /// The request-scoped logger span, or a disabled span when no event
    /// interceptor is installed. Logging inside a disabled span is a no-op
    /// for its fields but the log line itself still goes through the global
    /// subscriber.
    #[must_use]
    pub fn logger(&self) -> tracing::Span {
        self.logger.clone().unwrap_or_else(tracing::Span::none)
    }

    // ------------------------------------------------------------------
    // Tracing
    // ------------------------------------------------------------------

    /// Attaches tracing state. Called by the tracing interceptor.
    pub fn set_trace(&mut self, binding: TraceBinding) {
        self.trace = Some(binding);
    }

    /// The context carrying the active span, or an empty context whose span
    /// is non-recording when no tracing interceptor is installed.
    #[must_use]
    pub fn span(&self) -> opentelemetry::Context {
        self.trace
            .as_ref()
            .map_or_else(opentelemetry::Context::new, |b| b.span_cx.clone())
    }

    /// The active tracer, or one whose spans never record.
    #[must_use]
    pub fn tracer(&self) -> Tracer {
        self.trace
            .as_ref()
            .map_or_else(noop_tracer, |b| b.tracer.clone())
    }

    /// The active propagator, or one that reads and writes nothing.
    #[must_use]
    pub fn propagator(&self) -> SharedPropagator {
        self.trace
            .as_ref()
            .map_or_else(noop_propagator, |b| SharedPropagator::clone(&b.propagator))
    }

    /// The active tracer provider, or the shared no-op provider.
    #[must_use]
    pub fn tracer_provider(&self) -> TracerProvider {
        self.trace
            .as_ref()
            .map_or_else(noop_tracer_provider, |b| b.provider.clone())
    }

    // ------------------------------------------------------------------
    // Request metadata
    // ------------------------------------------------------------------

    /// The request method, when seeded.
    #[must_use]
    pub fn method(&self) -> Option<&http::Method> {
        self.method.as_ref()
    }

    /// The request path, when seeded.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The request query string, when present.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The request protocol (e.g. "HTTP/1.1"), when seeded.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// The caller's user agent, when present.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// The caller's remote address, when known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Records the response status code. Set by post-processing stages once
    /// the downstream response is known.
    pub fn set_response_code(&mut self, code: u16) {
        self.response_code = Some(code);
    }

    /// The recorded response status code, if any.
    #[must_use]
    pub fn response_code(&self) -> Option<u16> {
        self.response_code
    }

    // ------------------------------------------------------------------
    // Headers
    // ------------------------------------------------------------------

    /// Snapshot of the incoming request headers.
    #[must_use]
    pub fn incoming_headers(&self) -> &http::HeaderMap {
        &self.incoming_headers
    }

    /// Sets an outgoing response header, replacing any previous value.
    /// Invalid header names or values are ignored; this accessor never
    /// fails.
    pub fn set_response_header(&mut self, key: &str, value: &str) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(value),
        ) {
            self.response_headers.insert(name, val);
        }
    }

    /// Appends an outgoing response header, keeping previous values.
    /// Invalid header names or values are ignored; this accessor never
    /// fails.
    pub fn append_response_header(&mut self, key: &str, value: &str) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(value),
        ) {
            self.response_headers.append(name, val);
        }
    }

    /// Outgoing headers accumulated by stages; the pipeline merges these
    /// into the final response.
    #[must_use]
    pub fn response_headers(&self) -> &http::HeaderMap {
        &self.response_headers
    }

    // ------------------------------------------------------------------
    // Timing
    // ------------------------------------------------------------------

    /// When this context was created.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Elapsed time since this context was created.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    // ------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------

    /// Stores a typed extension value for later stages or handlers.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("entry", &self.entry)
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("response_code", &self.response_code)
            .finish_non_exhaustive()
    }
}
