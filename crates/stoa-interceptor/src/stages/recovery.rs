//! Panic recovery interceptor.
//!
//! The outermost stage. It wraps the remainder of the chain in a recovery
//! scope: any panic that escapes a downstream stage or the handler is
//! caught here, classified, recorded on the event, logged with its stack
//! trace, and answered with HTTP 500 carrying the structured error body.
//! A panic never terminates the request worker or the process.
//!
//! Payload classification is defensive - every step is a checked downcast:
//!
//! 1. [`ErrorResponse`] payloads (from `panic_any`) are used as-is
//! 2. `String` / `&str` payloads (from `panic!`) are wrapped into a 500
//!    envelope carrying the message
//! 3. Anything else synthesizes a 500 envelope with a fixed message
//!
//! Whatever the recovered envelope says, the wire status is always 500.
//!
//! This stage is also where the event is closed on the panic path: the
//! event stage's scope guard defers to recovery during an unwind so the
//! emitted event includes the panic counter and the recorded error.

use crate::context::RequestContext;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{Request, Response, ResponseExt};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use stoa_core::ErrorResponse;

/// Interceptor that converts unrecovered panics into structured 500
/// responses.
#[derive(Debug, Clone, Default)]
pub struct RecoveryInterceptor;

impl RecoveryInterceptor {
    /// Creates the recovery interceptor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Interceptor for RecoveryInterceptor {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let result = AssertUnwindSafe(next.run(&mut *ctx, request))
                .catch_unwind()
                .await;

            match result {
                Ok(response) => response,
                Err(payload) => recover(ctx, payload.as_ref()),
            }
        })
    }
}

fn recover(ctx: &mut RequestContext, payload: &(dyn Any + Send)) -> Response {
    let err = classify_panic(payload);

    ctx.set_response_code(500);
    let event = ctx.event();
    {
        let mut event = event.write();
        event.set_counter("panic", 1);
        event.add_error(&err);
        event.set_res_code(500);
    }

    let backtrace = std::backtrace::Backtrace::force_capture();
    let _guard = ctx.logger().entered();
    tracing::error!(error = %err, "panic recovered:\n{backtrace}");

    // Close the event left open by the unwound event stage. No-op if the
    // event stage never ran or already closed it.
    event.write().finish();

    Response::from_error_with_status(http::StatusCode::INTERNAL_SERVER_ERROR, &err)
}

fn classify_panic(payload: &(dyn Any + Send)) -> ErrorResponse {
    if let Some(resp) = payload.downcast_ref::<ErrorResponse>() {
        resp.clone()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        ErrorResponse::internal(message.clone())
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        ErrorResponse::internal(*message)
    } else {
        ErrorResponse::internal("unhandled panic")
    }
}
