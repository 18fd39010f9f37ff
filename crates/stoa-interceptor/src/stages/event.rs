//! Event (logging) interceptor.
//!
//! Opens the request event, assigns the request id, attaches the event and
//! a request-scoped logger span to the context, and closes the event exactly
//! once on the way out - on normal return, on handled errors, and after
//! panic recovery.
//!
//! The single-close invariant is carried by [`EventScope`], a guard whose
//! `Drop` runs on every exit path of the stage. During a panic unwind the
//! guard leaves the event open: the recovery interceptor, which is the only
//! stage that survives the unwind, records the panic and performs the close.
//! `Event::finish` is idempotent, so no path can double-emit.

use crate::context::{RequestContext, REQUEST_ID_HEADER};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{Request, Response};
use stoa_core::{EntryInfo, RequestId};
use stoa_telemetry::{Event, SharedEvent};

/// Interceptor that manages the per-request event lifecycle.
#[derive(Debug, Clone)]
pub struct EventInterceptor {
    entry: EntryInfo,
}

impl EventInterceptor {
    /// Creates the event interceptor for an entry.
    #[must_use]
    pub fn new(entry_name: impl Into<String>, entry_kind: impl Into<String>) -> Self {
        Self {
            entry: EntryInfo::new(entry_name, entry_kind),
        }
    }

    /// The entry this interceptor is bound to.
    #[must_use]
    pub fn entry(&self) -> &EntryInfo {
        &self.entry
    }
}

impl Interceptor for EventInterceptor {
    fn name(&self) -> &'static str {
        "event"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request_id = RequestId::new();
            let event = Event::request_shared(self.entry.clone());

            {
                let mut event = event.write();
                event.set_request_id(request_id.to_string());
                event.set_request_line(
                    ctx.method().map_or("", http::Method::as_str),
                    ctx.path().unwrap_or(""),
                    ctx.protocol().unwrap_or(""),
                    ctx.query().unwrap_or(""),
                );
                event.set_user_agent(ctx.user_agent().unwrap_or(""));
                event.set_remote_addr(ctx.remote_addr().unwrap_or(""));
                event.start();
            }

            let logger = tracing::info_span!(
                "request",
                entry_name = %self.entry.name(),
                request_id = %request_id,
            );

            ctx.set_entry(self.entry.clone());
            ctx.set_request_id(request_id);
            ctx.set_event(event.clone());
            ctx.set_logger(logger);
            ctx.set_response_header(REQUEST_ID_HEADER, &request_id.to_string());

            let scope = EventScope::new(event.clone());
            let response = next.run(ctx, request).await;

            {
                let mut event = event.write();
                event.set_res_code(response.status().as_u16());
                let trace_id = ctx.trace_id();
                if !trace_id.is_empty() {
                    event.set_trace_id(trace_id);
                }
            }
            ctx.set_response_code(response.status().as_u16());
            scope.complete();

            response
        })
    }
}

/// Guard that closes the event on every exit path of the event stage.
///
/// - Normal path: the stage records the response code and calls
///   [`EventScope::complete`].
/// - Cancellation (e.g. a timeout stage wrapped outside this one dropped
///   the chain): `Drop` closes the event with whatever was recorded.
/// - Panic unwind: `Drop` leaves the event open; the recovery interceptor
///   records the panic and closes it.
struct EventScope {
    event: SharedEvent,
    completed: bool,
}

impl EventScope {
    fn new(event: SharedEvent) -> Self {
        Self {
            event,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
        self.event.write().finish();
    }
}

impl Drop for EventScope {
    fn drop(&mut self) {
        if self.completed || std::thread::panicking() {
            return;
        }
        self.event.write().finish();
    }
}
