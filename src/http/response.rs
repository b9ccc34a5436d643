//! Error normalization.
//!
//! # Responsibilities
//! - Find the error a request ended with, if any
//! - Map it to one status and one JSON envelope
//! - Log it exactly once with the request's context
//!
//! # Design Decisions
//! - Precedence: domain error, then framework error, then opaque (500)
//! - Error-status responses with no attached `ApiError` and no JSON body
//!   came from the HTTP layer (unknown route, timeout, body limit, extractor
//!   rejections) and are treated as framework errors
//! - Causes and opaque details go to logs, never to the client

use axum::{
    body::{Body, HttpBody},
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::error::ApiError;
use crate::http::request::{RequestContext, RequestContextExt};

/// The only error body clients ever see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: bool,
    pub message: String,
    pub code: u16,
    #[serde(rename = "requestID")]
    pub request_id: String,
}

/// Longest rejection text read back as a framework error message.
const MAX_REJECTION_BYTES: usize = 1024;

/// Pick the error a finished response represents, if any.
///
/// Hands the response back untouched when it is a success, or an error that
/// already has a JSON body. Any other error status is a framework error: 4xx
/// keep the rejection text (bounded) as message, 5xx get the reason phrase.
pub async fn classify(response: Response) -> Result<Response, ApiError> {
    if let Some(err) = response.extensions().get::<ApiError>() {
        return Err(err.clone());
    }

    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_json(&response) {
        return Ok(response);
    }

    let reason = status.canonical_reason().unwrap_or("Request failed");
    let message = if status.is_client_error() && response.body().size_hint().exact() != Some(0) {
        axum::body::to_bytes(response.into_body(), MAX_REJECTION_BYTES)
            .await
            .ok()
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| reason.to_string())
    } else {
        reason.to_string()
    };

    Err(ApiError::framework(status, message))
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

/// Log `err` once and build the client response.
pub fn render(err: &ApiError, ctx: Option<&RequestContext>) -> Response {
    let status = err.status();
    let message = err.public_message();
    let (request_id, method, path) = match ctx {
        Some(ctx) => (ctx.id().as_str(), ctx.method().as_str(), ctx.path()),
        None => ("", "", ""),
    };

    match err {
        ApiError::Domain { cause, .. } => {
            let cause = cause.as_ref().map(ToString::to_string);
            if status.is_server_error() {
                tracing::error!(
                    request_id, method, path,
                    status = status.as_u16(),
                    error_message = message,
                    cause = cause.as_deref(),
                    "Application error"
                );
            } else {
                tracing::warn!(
                    request_id, method, path,
                    status = status.as_u16(),
                    error_message = message,
                    cause = cause.as_deref(),
                    "Application error"
                );
            }
        }
        ApiError::Framework { .. } => {
            if status.is_server_error() {
                tracing::error!(request_id, method, path, status = status.as_u16(), error_message = message, "Framework error");
            } else {
                tracing::warn!(request_id, method, path, status = status.as_u16(), error_message = message, "Framework error");
            }
        }
        ApiError::Opaque(inner) => {
            tracing::error!(
                request_id, method, path,
                status = status.as_u16(),
                error_message = message,
                error = %inner,
                "Unknown error"
            );
        }
    }

    let envelope = ErrorEnvelope {
        error: true,
        message: message.to_string(),
        code: status.as_u16(),
        request_id: request_id.to_string(),
    };
    (status, Json(envelope)).into_response()
}

/// Error normalizer middleware. Passes successful responses through untouched.
pub async fn normalize_errors(req: Request<Body>, next: Next) -> Response {
    let ctx = req.request_context().cloned();
    let response = next.run(req).await;

    match classify(response).await {
        Ok(response) => response,
        Err(err) => render(&err, ctx.as_ref()),
    }
}
