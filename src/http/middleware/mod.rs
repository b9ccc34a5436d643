//! Request middleware.
//!
//! - `fault_isolation`: turns handler panics into opaque 500s
//! - `access_control`: shared-secret header check for protected routes

pub mod access_control;
pub mod fault_isolation;

pub use access_control::{access_control_middleware, AccessGuard, ApiKey, ApiKeyError};
pub use fault_isolation::{install_panic_hook, isolate, isolate_faults, Fault};
