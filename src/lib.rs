//! HTTP gateway request pipeline.
//!
//! Every request passes through the same chain: correlation ID, access
//! log, error normalization, timeout, panic isolation, and (on protected
//! routes) a shared-secret check. Handlers can stream paced chunks through
//! [`http::streaming::ChunkWriter`].

// Core subsystems
pub mod config;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use http::{ApiError, GatewayServer};
pub use lifecycle::Shutdown;
