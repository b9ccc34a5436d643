//! Access Control Middleware.
//! Enforces the shared-secret header on protected routes.

use std::fmt;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

use crate::http::error::ApiError;
use crate::http::request::RequestContextExt;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiKeyError {
    #[error("shared secret must not be empty")]
    Empty,
    #[error("'{0}' is not a valid header name")]
    InvalidHeader(String),
}

/// Non-empty shared secret. Never printed.
#[derive(Clone)]
pub struct ApiKey(Arc<[u8]>);

impl ApiKey {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, ApiKeyError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(ApiKeyError::Empty);
        }
        Ok(Self(Arc::from(secret)))
    }

    /// Constant-time for equal-length inputs.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        self.0.as_ref().ct_eq(candidate).into()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// State required for access control.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    key: ApiKey,
    header: HeaderName,
}

impl AccessGuard {
    pub fn new(key: ApiKey, header: &str) -> Result<Self, ApiKeyError> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| ApiKeyError::InvalidHeader(header.to_string()))?;
        Ok(Self { key, header })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

pub async fn access_control_middleware(
    State(guard): State<AccessGuard>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let reason = match req.headers().get(&guard.header) {
        None => Some("Missing API key"),
        Some(value) if value.is_empty() => Some("Missing API key"),
        Some(value) if !guard.key.matches(value.as_bytes()) => Some("Invalid API key"),
        Some(_) => None,
    };

    if let Some(reason) = reason {
        let (request_id, client) = match req.request_context() {
            Some(ctx) => (ctx.id().to_string(), ctx.client()),
            None => (String::new(), "unknown".to_string()),
        };
        warn!(
            request_id = %request_id,
            path = %req.uri().path(),
            ip = %client,
            "{}", reason
        );
        return Err(ApiError::unauthorized());
    }

    Ok(next.run(req).await)
}
