//! YelloTalk Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other crates:
//! - Client configuration (endpoint, credentials, profile, timings)
//! - Global error type covering every error category
//! - Structured logging with tracing
//! - Common constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{YtError, YtResult};
pub use logging::init_logging;
