//! The interceptor pipeline.
//!
//! A pipeline is an explicit, ordered list of stages. Order is a
//! configuration concern: the builder appends stages in the order given and
//! the pipeline never reorders them. The conventional arrangement puts
//! panic recovery outermost, then the event stage, then metrics and
//! tracing, then auth and timeout, then the application handler:
//!
//! ```text
//! Request -> Recovery -> Event -> Metrics -> Tracing -> Auth -> Timeout -> Handler
//!                                                                            |
//! Response <- (post-processing in reverse order) <---------------------------+
//! ```
//!
//! Before the first stage runs, the pipeline seeds the request context with
//! request metadata; after the last stage returns, it merges the context's
//! accumulated response headers into the final response.

use crate::context::RequestContext;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{Request, Response};
use std::sync::Arc;

/// A type-erased interceptor that can be stored in the pipeline.
pub type BoxedInterceptor = Arc<dyn Interceptor>;

/// An ordered interceptor pipeline.
///
/// # Example
///
/// ```ignore
/// use stoa_interceptor::pipeline::Pipeline;
/// use stoa_interceptor::stages::RecoveryInterceptor;
///
/// let pipeline = Pipeline::builder()
///     .stage(RecoveryInterceptor::new())
///     .build();
///
/// let response = pipeline.process(&mut ctx, request, handler).await;
/// ```
pub struct Pipeline {
    stages: Vec<BoxedInterceptor>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through the pipeline.
    ///
    /// The request flows through every stage in order, then to the handler;
    /// each stage's post-logic runs in reverse order as the stack unwinds.
    pub async fn process<H>(
        &self,
        ctx: &mut RequestContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        ctx.seed_from_request(&request);

        let next = self.build_chain(handler);
        let mut response = next.run(ctx, request).await;

        merge_response_headers(ctx, &mut response);
        response
    }

    /// Builds the stage chain for one request, back to front.
    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for stage in self.stages.iter().rev() {
            next = Next::new(stage.as_ref(), next);
        }
        next
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Copies the context's accumulated response headers into the response,
/// replacing any values the handler set for the same names.
fn merge_response_headers(ctx: &RequestContext, response: &mut Response) {
    for name in ctx.response_headers().keys() {
        response.headers_mut().remove(name);
    }
    for (name, value) in ctx.response_headers() {
        response.headers_mut().append(name.clone(), value.clone());
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedInterceptor>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage. Stages run in the order they are added.
    #[must_use]
    pub fn stage<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.stages.push(Arc::new(interceptor));
        self
    }

    /// Appends an already-boxed stage.
    #[must_use]
    pub fn boxed_stage(mut self, interceptor: BoxedInterceptor) -> Self {
        self.stages.push(interceptor);
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct OrderTrackingInterceptor {
        name: &'static str,
        counter: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Interceptor for OrderTrackingInterceptor {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            let counter = self.counter.clone();
            let order = self.order.clone();
            let name = self.name;

            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                order.lock().unwrap().push(name);
                next.run(ctx, request).await
            })
        }
    }

    fn test_request(path: &str) -> Request {
        HttpRequest::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok_handler(
    ) -> impl FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + 'static
    {
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
    async fn test_pipeline_executes_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let make = |name| OrderTrackingInterceptor {
            name,
            counter: counter.clone(),
            order: order.clone(),
        };

        let pipeline = Pipeline::builder()
            .stage(make("first"))
            .stage(make("second"))
            .stage(make("third"))
            .build();

        assert_eq!(pipeline.stage_count(), 3);
        assert_eq!(pipeline.stage_names(), vec!["first", "second", "third"]);

        let mut ctx = RequestContext::new();
        let response = pipeline
            .process(&mut ctx, test_request("/test"), ok_handler())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_reaches_handler() {
        let pipeline = Pipeline::builder().build();
        let mut ctx = RequestContext::new();
        let response = pipeline
            .process(&mut ctx, test_request("/test"), ok_handler())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_process_seeds_context() {
        let pipeline = Pipeline::builder().build();
        let mut ctx = RequestContext::new();
        let _response = pipeline
            .process(&mut ctx, test_request("/seeded?x=1"), ok_handler())
            .await;
        assert_eq!(ctx.path(), Some("/seeded"));
        assert_eq!(ctx.query(), Some("x=1"));
    }

    #[tokio::test]
    async fn test_context_response_headers_override_handler_headers() {
        struct HeaderStage;

        impl Interceptor for HeaderStage {
            fn name(&self) -> &'static str {
                "header"
            }

            fn process<'a>(
                &'a self,
                ctx: &'a mut RequestContext,
                request: Request,
                next: Next<'a>,
            ) -> BoxFuture<'a, Response> {
                Box::pin(async move {
                    ctx.set_response_header("x-request-id", "from-stage");
                    next.run(ctx, request).await
                })
            }
        }

        let pipeline = Pipeline::builder().stage(HeaderStage).build();
        let mut ctx = RequestContext::new();
        let response = pipeline
            .process(&mut ctx, test_request("/test"), |_ctx, _req| {
                Box::pin(async {
                    HttpResponse::builder()
                        .status(StatusCode::OK)
                        .header("x-request-id", "from-handler")
                        .body(Full::new(Bytes::from("OK")))
                        .unwrap()
                })
            })
            .await;

        assert_eq!(response.headers().get("x-request-id").unwrap(), "from-stage");
    }
}
