//! Shared building blocks for the logosrv services
//!
//! - logging (console + daily rolling file, reloadable filter)
//! - graceful shutdown signals
//! - bootstrap arguments and startup banner
//! - hex formatting for frame traces

pub mod bootstrap_args;
pub mod hex;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

// Re-export common dependencies
pub use anyhow;
pub use tokio;
