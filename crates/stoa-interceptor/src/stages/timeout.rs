//! Timeout interceptor.
//!
//! Races the remainder of the chain against a configurable duration. On
//! expiry the raced future is dropped and a 408 structured error is
//! returned; a `timeout` counter is recorded on the event. Because the
//! response is a value produced by the winner of the race, a late handler
//! result cannot alter the committed response. Side effects the handler
//! performed before cancellation are not rolled back.

use crate::context::RequestContext;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{Request, Response, ResponseExt};
use std::collections::HashMap;
use std::time::Duration;
use stoa_core::ErrorResponse;

/// Interceptor that bounds request processing time.
#[derive(Debug, Clone)]
pub struct TimeoutInterceptor {
    default_timeout: Duration,
    per_path: HashMap<String, Duration>,
}

impl TimeoutInterceptor {
    /// Creates the timeout interceptor with a global default duration.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            per_path: HashMap::new(),
        }
    }

    /// Overrides the timeout for an exact request path.
    #[must_use]
    pub fn with_path_timeout(mut self, path: impl Into<String>, timeout: Duration) -> Self {
        self.per_path.insert(path.into(), timeout);
        self
    }

    fn budget_for(&self, path: &str) -> Duration {
        self.per_path
            .get(path)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

impl Interceptor for TimeoutInterceptor {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let budget = self.budget_for(ctx.path().unwrap_or(""));

            match tokio::time::timeout(budget, next.run(&mut *ctx, request)).await {
                Ok(response) => response,
                Err(_elapsed) => {
                    let err = ErrorResponse::timeout("Request timed out");
                    ctx.event().write().inc_counter("timeout", 1);
                    ctx.set_response_code(err.error.code);
                    Response::from_error(&err)
                }
            }
        })
    }
}
