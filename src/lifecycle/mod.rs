//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every subscriber wakes
//!
//! Signals (signals.rs):
//!     SIGTERM / Ctrl+C / trigger() → stop accepting → drain → exit
//! ```
//!
//! # Design Decisions
//! - Shutdown has a timeout: in-flight requests are cut off after
//!   `timeouts.shutdown_secs`

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{wait_for_shutdown, ShutdownReason};
