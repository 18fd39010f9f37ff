//! Core interceptor trait and chain types.
//!
//! An interceptor wraps the remainder of the chain: it derives state, stores
//! it in the request context, invokes the next stage, and post-processes
//! after the next stage returns. Stack discipline gives the ordering
//! guarantee the telemetry stages rely on: an interceptor's pre-logic
//! happens-before the next stage, which happens-before its post-logic.
//!
//! # Example
//!
//! ```ignore
//! use stoa_interceptor::{Interceptor, Next, Request, Response, BoxFuture};
//! use stoa_interceptor::context::RequestContext;
//!
//! struct TimingInterceptor;
//!
//! impl Interceptor for TimingInterceptor {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             let start = std::time::Instant::now();
//!             let response = next.run(ctx, request).await;
//!             tracing::debug!(elapsed = ?start.elapsed(), "request timed");
//!             response
//!         })
//!     }
//! }
//! ```

use crate::context::RequestContext;
use crate::types::{Request, Response};
use std::future::Future;
use std::pin::Pin;

/// A boxed future that returns a response.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The core interceptor trait.
///
/// Every stage implements this trait. A stage receives a mutable request
/// context, the incoming request, and a [`Next`] handle for the remainder of
/// the chain.
///
/// # Invariants
///
/// - A stage MUST call `next.run()` exactly once, unless it short-circuits
///   with its own response (auth failure, timeout)
/// - Stages report outcomes through the shared request context (event
///   fields, error lists), not by panicking across stage boundaries; the
///   recovery stage is the only unwind boundary
pub trait Interceptor: Send + Sync + 'static {
    /// Returns the unique name of this stage.
    ///
    /// Used for logging and debugging.
    fn name(&self) -> &'static str;

    /// Processes the request through this stage.
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// Handle to the remainder of the interceptor chain.
///
/// Consumed by [`Next::run`], so a stage can invoke its downstream at most
/// once. Not calling it short-circuits the chain.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    /// More interceptors to process.
    Chain {
        interceptor: &'a dyn Interceptor,
        next: Box<Next<'a>>,
    },
    /// End of chain - invoke the handler.
    Handler(
        Box<dyn FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + 'a>,
    ),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that will invoke the given interceptor.
    pub(crate) fn new(interceptor: &'a dyn Interceptor, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                interceptor,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    pub(crate) fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next stage or the handler.
    pub async fn run(self, ctx: &mut RequestContext, request: Request) -> Response {
        match self.inner {
            NextInner::Chain { interceptor, next } => {
                interceptor.process(ctx, request, *next).await
            }
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

/// An interceptor created from a function returning a boxed future.
///
/// Allows defining simple stages without implementing the trait directly.
///
/// # Example
///
/// ```ignore
/// fn probe<'a>(
///     ctx: &'a mut RequestContext,
///     request: Request,
///     next: Next<'a>,
/// ) -> BoxFuture<'a, Response> {
///     Box::pin(async move {
///         let response = next.run(ctx, request).await;
///         tracing::debug!(status = %response.status(), "probed");
///         response
///     })
/// }
///
/// let stage = FnInterceptor::new("probe", probe);
/// ```
pub struct FnInterceptor<F> {
    name: &'static str,
    func: F,
}

impl<F> FnInterceptor<F> {
    /// Creates a new function-based interceptor.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Request, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        (self.func)(ctx, request, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;

    struct MarkerInterceptor {
        name: &'static str,
    }

    impl Interceptor for MarkerInterceptor {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                ctx.set_extension(format!("visited:{}", self.name));
                next.run(ctx, request).await
            })
        }
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

    #[tokio::test]
    async fn test_next_handler() {
        let mut ctx = RequestContext::new();
        let request: Request = HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let next = Next::handler(ok_handler());
        let response = next.run(&mut ctx, request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_interceptor_chain() {
        let first = MarkerInterceptor { name: "first" };
        let second = MarkerInterceptor { name: "second" };

        let mut ctx = RequestContext::new();
        let request: Request = HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let handler = Next::handler(ok_handler());
        let next2 = Next::new(&second, handler);
        let next1 = Next::new(&first, next2);

        let response = next1.run(&mut ctx, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            ctx.get_extension::<String>(),
            Some(&"visited:second".to_string())
        );
    }

    fn counting_stage<'a>(
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            ctx.set_extension(1_i32);
            next.run(ctx, request).await
        })
    }

    #[tokio::test]
    async fn test_fn_interceptor() {
        let stage = FnInterceptor::new("fn-stage", counting_stage);
        assert_eq!(stage.name(), "fn-stage");

        let mut ctx = RequestContext::new();
        let request: Request = HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = stage
            .process(&mut ctx, request, Next::handler(ok_handler()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.get_extension::<i32>(), Some(&1));
    }
}
