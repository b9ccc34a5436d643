//! Request correlation.
//!
//! # Responsibilities
//! - Assign one correlation id per request before any other stage runs
//! - Reuse a caller-supplied `X-Request-ID` when it is usable
//! - Expose the id (and method/path/client address) to later stages
//! - Stamp `X-Request-ID` on every response, success or failure
//!
//! # Design Decisions
//! - `SetRequestIdLayer` from tower-http seeds the request header; the
//!   `correlate` middleware turns it into an immutable [`RequestContext`]
//! - Every request runs inside a `request` span so each log line carries the id

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{MakeRequestId, RequestId};
use tower_http::trace::MakeSpan;
use tracing::{Instrument, Span};

/// Correlation header, read on the way in and written on the way out.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Opaque per-request correlation identifier. Cheap to clone, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a fresh collision-resistant id (UUID v4).
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    /// Reuse an inbound header value if it is non-empty visible ASCII.
    pub fn from_header(value: &HeaderValue) -> Option<Self> {
        value
            .to_str()
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| Self(Arc::from(v)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Id generation strategy plugged into `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeCorrelationId;

impl MakeRequestId for MakeCorrelationId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        CorrelationId::generate()
            .to_header_value()
            .map(RequestId::new)
    }
}

/// Per-request facts available to every stage after the correlator.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: CorrelationId,
    method: Method,
    path: String,
    client_addr: Option<SocketAddr>,
}

impl RequestContext {
    pub fn new(id: CorrelationId, method: Method, path: impl Into<String>, client_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            method,
            path: path.into(),
            client_addr,
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// Client address for log fields.
    pub fn client(&self) -> String {
        self.client_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Read accessor for later stages.
pub trait RequestContextExt {
    fn request_context(&self) -> Option<&RequestContext>;
}

impl<B> RequestContextExt for Request<B> {
    fn request_context(&self) -> Option<&RequestContext> {
        self.extensions().get::<RequestContext>()
    }
}

/// Span for `TraceLayer` that carries the request's correlation id, so the
/// access log lines and anything logged beneath them can be traced back.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let request_id = req
            .request_context()
            .map(|ctx| ctx.id().to_string())
            .unwrap_or_default();
        tracing::info_span!(
            "http",
            request_id = %request_id,
            method = %req.method(),
            uri = %req.uri(),
            version = ?req.version(),
        )
    }
}

/// Correlator middleware. Must wrap every other stage.
pub async fn correlate(mut req: Request<Body>, next: Next) -> Response {
    let id = req
        .extensions()
        .get::<RequestId>()
        .map(RequestId::header_value)
        .or_else(|| req.headers().get(&X_REQUEST_ID))
        .and_then(CorrelationId::from_header)
        .unwrap_or_else(CorrelationId::generate);

    // Downstream code reading the raw header sees the same value.
    let header = id.to_header_value();
    if let Some(value) = header.clone() {
        req.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }

    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ctx = RequestContext::new(
        id.clone(),
        req.method().clone(),
        req.uri().path(),
        client_addr,
    );

    let span = tracing::info_span!(
        "request",
        request_id = %ctx.id(),
        method = %ctx.method(),
        path = %ctx.path(),
    );

    req.extensions_mut().insert(ctx);
    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = header {
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    async fn echo_id(req: Request<Body>) -> String {
        req.request_context()
            .map(|ctx| ctx.id().to_string())
            .unwrap_or_default()
    }

    fn app() -> Router {
        Router::new()
            .route("/id", get(echo_id))
            .layer(axum::middleware::from_fn(correlate))
    }

    #[tokio::test]
    async fn test_generates_id_when_absent() {
        let response = app()
            .oneshot(Request::get("/id").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers().get(&X_REQUEST_ID).unwrap().to_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, header.as_bytes());
    }

    #[tokio::test]
    async fn test_propagates_inbound_id() {
        let response = app()
            .oneshot(
                Request::get("/id")
                    .header("X-Request-ID", "caller-trace-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(&X_REQUEST_ID).unwrap(), "caller-trace-42");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"caller-trace-42");
    }

    #[tokio::test]
    async fn test_empty_inbound_id_is_replaced() {
        let response = app()
            .oneshot(
                Request::get("/id")
                    .header("x-request-id", "")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let header = response.headers().get(&X_REQUEST_ID).unwrap();
        assert!(!header.is_empty());
    }

    #[tokio::test]
    async fn test_header_set_once_even_if_handler_sets_one() {
        let app = Router::new()
            .route(
                "/",
                get(|| async { ([("x-request-id", "handler-made-this-up")], "ok") }),
            )
            .layer(axum::middleware::from_fn(correlate));

        let response = app
            .oneshot(
                Request::get("/")
                    .header("x-request-id", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let values: Vec<_> = response.headers().get_all(&X_REQUEST_ID).iter().collect();
        assert_eq!(values, vec!["abc"]);
    }

    #[test]
    fn test_make_correlation_id_is_unique() {
        let req = Request::get("/").body(()).unwrap();
        let mut make = MakeCorrelationId;
        let a = make.make_request_id(&req).unwrap();
        let b = make.make_request_id(&req).unwrap();
        assert_ne!(a.header_value(), b.header_value());
    }
}
