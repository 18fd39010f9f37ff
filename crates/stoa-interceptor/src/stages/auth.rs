//! Auth interceptor.
//!
//! Validates Basic, Bearer, and API-key credentials against the entry's
//! configured allow-lists before the next stage runs. On failure the chain
//! is short-circuited with HTTP 401 and the structured error body; the
//! failure is recorded on the event (a client input error, not a server
//! fault).
//!
//! Credential syntax validation belongs to the bootstrap layer; the lists
//! here are already-validated values compared verbatim.

use crate::context::RequestContext;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{Request, Response, ResponseExt};
use base64::Engine as _;
use std::sync::Arc;
use stoa_core::{EntryInfo, ErrorResponse};
use stoa_telemetry::{AuthOptions, EntryRegistry};

/// Request header carrying an API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Interceptor that enforces credential allow-lists for one entry.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    options: Arc<AuthOptions>,
}

impl AuthInterceptor {
    /// Creates a builder for the auth interceptor.
    #[must_use]
    pub fn builder(registry: Arc<EntryRegistry>, entry: EntryInfo) -> AuthInterceptorBuilder {
        let options = AuthOptions::new(entry.clone());
        AuthInterceptorBuilder {
            registry,
            entry,
            options,
        }
    }

    /// The resolved option set.
    #[must_use]
    pub fn options(&self) -> &Arc<AuthOptions> {
        &self.options
    }

    fn authorize(&self, request: &Request) -> Result<(), ErrorResponse> {
        let authorization = request
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let api_key = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());

        let Some(credential) = authorization.or(api_key) else {
            return Err(ErrorResponse::unauthorized("Missing authorization"));
        };

        if let Some(encoded) = authorization.and_then(|v| v.strip_prefix("Basic ")) {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            if let Some(credential) = decoded {
                if self.options.basic().contains(&credential) {
                    return Ok(());
                }
            }
        } else if let Some(token) = authorization.and_then(|v| v.strip_prefix("Bearer ")) {
            if self.options.bearer().contains(token) {
                return Ok(());
            }
        } else if authorization.is_none() {
            if self.options.api_keys().contains(credential) {
                return Ok(());
            }
        }

        Err(ErrorResponse::unauthorized("Invalid credentials"))
    }
}

/// Builder for [`AuthInterceptor`].
pub struct AuthInterceptorBuilder {
    registry: Arc<EntryRegistry>,
    entry: EntryInfo,
    options: AuthOptions,
}

impl AuthInterceptorBuilder {
    /// Allows a `user:pass` Basic credential.
    #[must_use]
    pub fn basic(mut self, credential: impl Into<String>) -> Self {
        self.options = self.options.with_basic(credential);
        self
    }

    /// Allows a Bearer token.
    #[must_use]
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.options = self.options.with_bearer(token);
        self
    }

    /// Allows an API key (sent via the `x-api-key` header).
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.options = self.options.with_api_key(key);
        self
    }

    /// Sets the `WWW-Authenticate` challenge realm.
    #[must_use]
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.options = self.options.with_realm(realm);
        self
    }

    /// Builds the interceptor, registering the entry's auth rules if the
    /// entry is not yet registered. For an already-registered entry the
    /// existing rules win and this builder's are discarded.
    #[must_use]
    pub fn build(self) -> AuthInterceptor {
        let options = self.registry.auth_or_register(&self.entry, || self.options);
        AuthInterceptor { options }
    }
}

impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if ctx.entry_name().is_empty() {
                ctx.set_entry(self.options.entry().clone());
            }

            match self.authorize(&request) {
                Ok(()) => next.run(ctx, request).await,
                Err(err) => {
                    ctx.event().write().add_error(&err);

                    let mut response = Response::from_error(&err);
                    if !self.options.basic().is_empty() {
                        let challenge = format!("Basic realm=\"{}\"", self.options.realm());
                        if let Ok(value) = http::HeaderValue::try_from(challenge) {
                            response
                                .headers_mut()
                                .insert(http::header::WWW_AUTHENTICATE, value);
                        }
                    }
                    response
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::{BodyExt, Full};

    fn basic_stage() -> (Arc<EntryRegistry>, AuthInterceptor) {
        let registry = EntryRegistry::new();
        let stage = AuthInterceptor::builder(
            Arc::clone(&registry),
            EntryInfo::new("ut-auth", "http"),
        )
        .basic("user:pass")
        .build();
        (registry, stage)
    }

    fn request_with_header(header: Option<(&str, &str)>) -> Request {
        let mut builder = HttpRequest::builder().method("GET").uri("/svc/hello");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
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

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let (_registry, stage) = basic_stage();
        let mut ctx = RequestContext::new();

        let response = stage
            .process(&mut ctx, request_with_header(None), Next::handler(ok_handler()))
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(http::header::WWW_AUTHENTICATE));
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "Missing authorization");
    }

    #[tokio::test]
    async fn test_wrong_basic_credentials_rejected() {
        let (_registry, stage) = basic_stage();
        let mut ctx = RequestContext::new();

        let encoded = base64::engine::general_purpose::STANDARD.encode("user:wrong");
        let response = stage
            .process(
                &mut ctx,
                request_with_header(Some(("authorization", &format!("Basic {encoded}")))),
                Next::handler(ok_handler()),
            )
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn test_valid_basic_credentials_pass() {
        let (_registry, stage) = basic_stage();
        let mut ctx = RequestContext::new();

        let encoded = base64::engine::general_purpose::STANDARD.encode("user:pass");
        let response = stage
            .process(
                &mut ctx,
                request_with_header(Some(("authorization", &format!("Basic {encoded}")))),
                Next::handler(ok_handler()),
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let registry = EntryRegistry::new();
        let stage = AuthInterceptor::builder(
            Arc::clone(&registry),
            EntryInfo::new("ut-auth-bearer", "http"),
        )
        .bearer("tok-123")
        .build();

        let mut ctx = RequestContext::new();
        let response = stage
            .process(
                &mut ctx,
                request_with_header(Some(("authorization", "Bearer tok-123"))),
                Next::handler(ok_handler()),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut ctx = RequestContext::new();
        let response = stage
            .process(
                &mut ctx,
                request_with_header(Some(("authorization", "Bearer tok-999"))),
                Next::handler(ok_handler()),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_key() {
        let registry = EntryRegistry::new();
        let stage = AuthInterceptor::builder(
            Arc::clone(&registry),
            EntryInfo::new("ut-auth-key", "http"),
        )
        .api_key("key-abc")
        .build();

        let mut ctx = RequestContext::new();
        let response = stage
            .process(
                &mut ctx,
                request_with_header(Some((API_KEY_HEADER, "key-abc"))),
                Next::handler(ok_handler()),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        // API-key-only entries issue no Basic challenge.
        let mut ctx = RequestContext::new();
        let response = stage
            .process(&mut ctx, request_with_header(None), Next::handler(ok_handler()))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!response.headers().contains_key(http::header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_failure_recorded_on_event() {
        let (_registry, stage) = basic_stage();
        let mut ctx = RequestContext::new();
        ctx.set_event(stoa_telemetry::Event::request_shared(EntryInfo::new(
            "ut-auth",
            "http",
        )));

        let _response = stage
            .process(&mut ctx, request_with_header(None), Next::handler(ok_handler()))
            .await;

        assert_eq!(ctx.event().read().error_count(), 1);
    }

    #[tokio::test]
    async fn test_rules_are_first_registration_wins() {
        let registry = EntryRegistry::new();
        let entry = EntryInfo::new("ut-auth-idem", "http");
        let first = AuthInterceptor::builder(Arc::clone(&registry), entry.clone())
            .basic("user:pass")
            .build();
        let second = AuthInterceptor::builder(Arc::clone(&registry), entry)
            .basic("other:creds")
            .build();

        assert!(Arc::ptr_eq(first.options(), second.options()));
        assert!(second.options().basic().contains("user:pass"));
        assert!(!second.options().basic().contains("other:creds"));
    }
}
