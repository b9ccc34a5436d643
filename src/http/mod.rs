//! HTTP request pipeline.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (X-Request-ID, request context, request span)
//!     → response.rs (error normalization into the JSON envelope)
//!     → middleware/fault_isolation.rs (panic recovery)
//!     → middleware/access_control.rs (shared secret, protected routes only)
//!     → handlers.rs (health, paced stream)
//!     → streaming.rs (chunk writer, sinks)
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod streaming;

pub use error::{ApiError, ApiJson};
pub use request::{CorrelationId, RequestContext, RequestContextExt, X_REQUEST_ID};
pub use response::ErrorEnvelope;
pub use server::{GatewayServer, Pipeline};
pub use streaming::{ChunkSink, ChunkWriter, StreamOutcome, StreamState};
