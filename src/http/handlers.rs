//! Built-in endpoints: health check and the paced text stream.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::http::error::{ApiError, ApiJson};
use crate::http::streaming::{stream_response, ChunkWriter};

/// State shared by the built-in handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub writer: ChunkWriter,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub time: String,
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

fn default_chunk_size() -> usize {
    1024
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub text: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// Split `data` into pieces of at most `size` bytes without copying.
pub fn split_chunks(data: Bytes, size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(data.len().div_ceil(size.max(1)));
    let mut start = 0;
    while start < data.len() {
        let end = (start + size).min(data.len());
        chunks.push(data.slice(start..end));
        start = end;
    }
    chunks
}

/// `POST /api/stream`: send `text` back as paced chunks.
pub async fn stream_text(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StreamRequest>,
) -> Result<Response, ApiError> {
    if req.chunk_size == 0 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "chunk_size must be greater than zero",
        ));
    }

    let chunks = split_chunks(Bytes::from(req.text), req.chunk_size);
    tracing::debug!(chunks = chunks.len(), chunk_size = req.chunk_size, "Starting chunked stream");
    stream_response(chunks, state.writer).await
}
