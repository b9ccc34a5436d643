//! Request-facing error type.
//!
//! Every failure on the request path is an [`ApiError`]. It has exactly three
//! shapes and the error normalizer (`response.rs`) is the only place that turns
//! one into a client-visible body.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use axum::{
    extract::rejection::{BytesRejection, JsonRejection, QueryRejection},
    extract::FromRequest,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Shared, clonable error cause.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Message sent to clients for any error without a known structured shape.
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// A failed request, in one of three shapes.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Business-rule or client-input rejection with its own status and message.
    /// The cause is logged server-side and never sent to the client.
    #[error("{message}")]
    Domain {
        status: StatusCode,
        message: String,
        cause: Option<Cause>,
    },

    /// Raised by the HTTP layer itself (bad body, unknown route, timeout).
    #[error("{message}")]
    Framework { status: StatusCode, message: String },

    /// Anything else, including recovered panics. Always a 500.
    #[error("{0}")]
    Opaque(Cause),
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError::Domain {
            status,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause<E>(status: StatusCode, message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ApiError::Domain {
            status,
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn framework(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError::Framework {
            status,
            message: message.into(),
        }
    }

    pub fn opaque<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ApiError::Opaque(Arc::new(err))
    }

    pub fn invalid_input() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid input")
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn payment_required() -> Self {
        Self::new(StatusCode::PAYMENT_REQUIRED, "Payment required")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Resource not found")
    }

    pub fn too_many_requests() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
    }

    pub fn service_unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
    }

    /// Keep an existing `ApiError` as is; anything else becomes a 500 domain
    /// error with `message` for the client and `err` as the logged cause.
    pub fn wrap<E>(err: E, message: impl Into<String>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let boxed: Box<dyn StdError + Send + Sync> = Box::new(err);
        match boxed.downcast::<ApiError>() {
            Ok(api) => *api,
            Err(other) => ApiError::Domain {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: message.into(),
                cause: Some(Arc::from(other)),
            },
        }
    }

    /// Status the client will receive.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Domain { status, .. } | ApiError::Framework { status, .. } => *status,
            ApiError::Opaque(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message the client will receive.
    pub fn public_message(&self) -> &str {
        match self {
            ApiError::Domain { message, .. } | ApiError::Framework { message, .. } => message,
            ApiError::Opaque(_) => INTERNAL_MESSAGE,
        }
    }

    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Domain { .. } => "domain",
            ApiError::Framework { .. } => "framework",
            ApiError::Opaque(_) => "opaque",
        }
    }
}

/// The response carries no body yet: the error normalizer finds the error in
/// the response extensions and renders the envelope with the request id.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        response.extensions_mut().insert(self);
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::framework(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::framework(rejection.status(), rejection.body_text())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        ApiError::framework(rejection.status(), rejection.body_text())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::opaque(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::opaque(err)
    }
}

/// JSON body extractor whose rejections are framework errors.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// A recovered panic, carried as the cause of an opaque error.
#[derive(Debug, Clone)]
pub struct PanicError {
    pub message: String,
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler panicked: {}", self.message)
    }
}

impl StdError for PanicError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_statuses() {
        assert_eq!(ApiError::invalid_input().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::unauthorized().public_message(), "Unauthorized");
        assert_eq!(ApiError::not_found().public_message(), "Resource not found");
        assert_eq!(ApiError::service_unavailable().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_opaque_hides_detail() {
        let err = ApiError::opaque(std::io::Error::other("disk on fire"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), INTERNAL_MESSAGE);
        assert_eq!(err.kind(), "opaque");
        // The detail is still available for logs.
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn test_wrap_keeps_existing_api_error() {
        let wrapped = ApiError::wrap(ApiError::not_found(), "lookup failed");
        assert_eq!(wrapped.status(), StatusCode::NOT_FOUND);
        assert_eq!(wrapped.public_message(), "Resource not found");
    }

    #[test]
    fn test_wrap_other_error_becomes_500_with_cause() {
        let wrapped = ApiError::wrap(std::io::Error::other("timeout"), "lookup failed");
        match wrapped {
            ApiError::Domain {
                status,
                message,
                cause,
            } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "lookup failed");
                assert_eq!(cause.unwrap().to_string(), "timeout");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_into_response_stashes_error() {
        let response = ApiError::forbidden().into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let stashed = response.extensions().get::<ApiError>().unwrap();
        assert_eq!(stashed.public_message(), "Forbidden");
    }
}
