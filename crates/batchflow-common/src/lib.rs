//! Batchflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing used by every batchflow workspace member:
//!
//! - **Logging**: `tracing` subscriber bootstrap driven by `LOG_*` variables
//! - **Environment**: typed lookups for configuration variables

pub mod env;
pub mod logging;

pub use logging::{init_logging, LogConfig, LoggingGuard};
