//! The structured error envelope.
//!
//! Every user-visible failure - auth rejection, timeout, recovered panic -
//! is written to the client as the same JSON shape:
//!
//! ```json
//! {
//!   "error": {
//!     "code": 401,
//!     "status": "Unauthorized",
//!     "message": "Missing authorization",
//!     "details": []
//!   }
//! }
//! ```
//!
//! Internal telemetry failures never use this envelope; they are logged and
//! the request proceeds.

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// A structured error response.
///
/// Implements [`std::error::Error`] so it can travel through error lists,
/// event records, and panic payloads without losing its shape: the recovery
/// interceptor downcasts panic payloads back to `ErrorResponse` and writes
/// them to the client as-is.
///
/// # Example
///
/// ```
/// use stoa_core::ErrorResponse;
/// use http::StatusCode;
///
/// let resp = ErrorResponse::unauthorized("Missing authorization");
/// assert_eq!(resp.error.code, 401);
/// assert_eq!(resp.error.status, "Unauthorized");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The error payload.
    pub error: ErrorBody,
}

/// Body of an [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Numeric HTTP status code.
    pub code: u16,
    /// Canonical status text (e.g. "Unauthorized").
    pub status: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details. Always present in the wire shape,
    /// possibly empty.
    pub details: Vec<serde_json::Value>,
}

impl ErrorResponse {
    /// Creates an error response for an HTTP status with a message.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: status.as_u16(),
                status: status.canonical_reason().unwrap_or("Unknown").to_string(),
                message: message.into(),
                details: Vec::new(),
            },
        }
    }

    /// 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 408 Request Timeout.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT, message)
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Wraps an arbitrary error into a 500 response.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::internal(err.to_string())
    }

    /// Attaches a structured detail value.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.error.details.push(detail);
        self
    }

    /// The HTTP status code this response carries.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.error.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.error.code, self.error.status, self.error.message
        )
    }
}

impl std::error::Error for ErrorResponse {}
