//! # Stoa Interceptor
//!
//! The interceptor pipeline for Stoa: chain-of-responsibility request
//! processing with per-entry telemetry.
//!
//! A process may host several independently configured logical server
//! instances ("entries"). Each entry assembles a pipeline of stages;
//! every stage derives request-scoped state, stores it in the
//! [`RequestContext`], invokes the rest of the chain, and post-processes
//! after the chain returns:
//!
//! ```text
//! Request -> Recovery -> Event -> Metrics -> Tracing -> Auth -> Timeout -> Handler
//!                                                                            |
//! Response <- (post-processing in reverse order) <---------------------------+
//! ```
//!
//! ## Key guarantees
//!
//! - **No-op degradation**: every context accessor returns a usable inert
//!   value when the corresponding stage is not installed - getters never
//!   fail
//! - **Single close**: the request event is opened and closed exactly once
//!   per request, on every exit path including panics
//! - **Recovery**: panics never escape the outermost stage; they become
//!   structured 500 responses
//! - **Idempotent construction**: building a stage twice for the same entry
//!   name reuses the first registration's option set
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use stoa_core::EntryInfo;
//! use stoa_interceptor::pipeline::Pipeline;
//! use stoa_interceptor::stages::*;
//! use stoa_telemetry::EntryRegistry;
//!
//! let registry = EntryRegistry::new();
//! let entry = EntryInfo::new("user-api", "http");
//!
//! let pipeline = Pipeline::builder()
//!     .stage(RecoveryInterceptor::new())
//!     .stage(EventInterceptor::new("user-api", "http"))
//!     .stage(MetricsInterceptor::new(&registry, entry.clone()))
//!     .stage(TracingInterceptor::builder(registry.clone(), entry).build()?)
//!     .stage(TimeoutInterceptor::new(Duration::from_secs(5)))
//!     .build();
//! ```

#![doc(html_root_url = "https://docs.rs/stoa-interceptor/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod interceptor;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use context::{RequestContext, TraceBinding, REQUEST_ID_HEADER, TRACE_ID_HEADER};
pub use interceptor::{BoxFuture, FnInterceptor, Interceptor, Next};
pub use pipeline::{BoxedInterceptor, Pipeline, PipelineBuilder};
pub use types::{Request, Response, ResponseExt};
