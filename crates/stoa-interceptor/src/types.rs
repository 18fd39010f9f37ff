//! Common types used throughout the interceptor pipeline.

use bytes::Bytes;
use http_body_util::Full;
use stoa_core::ErrorResponse;

/// The HTTP request type used in the interceptor pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the interceptor pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building responses from the structured error envelope.
pub trait ResponseExt {
    /// Creates a response carrying `err` as its JSON body, with the status
    /// code the envelope names.
    fn from_error(err: &ErrorResponse) -> Response;

    /// Creates a response carrying `err` as its JSON body under an explicit
    /// status code.
    ///
    /// The recovery interceptor uses this: recovered panics always answer
    /// with HTTP 500, whatever status the recovered envelope itself carries.
    fn from_error_with_status(status: http::StatusCode, err: &ErrorResponse) -> Response;
}

impl ResponseExt for Response {
    fn from_error(err: &ErrorResponse) -> Response {
        Self::from_error_with_status(err.status_code(), err)
    }

    fn from_error_with_status(status: http::StatusCode, err: &ErrorResponse) -> Response {
        let body = serde_json::to_string(err).unwrap_or_else(|_| {
            r#"{"error":{"code":500,"status":"Internal Server Error","message":"error serialization failed","details":[]}}"#.to_string()
        });

        http::Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .expect("failed to build error response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_error_response_status_and_content_type() {
        let err = ErrorResponse::unauthorized("Missing authorization");
        let response = Response::from_error(&err);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_explicit_status_overrides_envelope_code() {
        let err = ErrorResponse::unauthorized("auth panic");
        let response = Response::from_error_with_status(StatusCode::INTERNAL_SERVER_ERROR, &err);
        // Status line says 500; the body still carries the original envelope.
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
