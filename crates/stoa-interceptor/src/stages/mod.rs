//! The interceptor stages.
//!
//! Each stage is independently optional; composition order is configured
//! through the pipeline builder. The conventional order puts recovery
//! outermost, then the event stage, then metrics and tracing, then auth and
//! timeout closest to the handler.

pub mod auth;
pub mod event;
pub mod metrics;
pub mod recovery;
pub mod timeout;
pub mod tracing;

pub use auth::AuthInterceptor;
pub use event::EventInterceptor;
pub use metrics::MetricsInterceptor;
pub use recovery::RecoveryInterceptor;
pub use timeout::TimeoutInterceptor;
pub use tracing::TracingInterceptor;
