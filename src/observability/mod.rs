//! Observability.
//!
//! # Data Flow
//! ```text
//! Every subsystem emits tracing events
//!     → request span (request.rs) adds request_id, method, path
//!     → logging.rs formats them as pretty text or JSON lines
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every event via the request span
//! - Errors are logged once, where they are normalized

pub mod logging;

pub use logging::{init, DEFAULT_FILTER};
