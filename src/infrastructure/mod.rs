//! Infrastructure layer module
//!
//! Process-level concerns shared by every command:
//! - Configuration management (figment layering and validation)
//! - Logging infrastructure (tracing subscribers, rolling files)

pub mod config;
pub mod logging;
