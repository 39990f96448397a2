//! Structured logging on tracing-subscriber: JSON or pretty console output
//! plus optional rolling JSON files.

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
