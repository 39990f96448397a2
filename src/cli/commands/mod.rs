//! CLI command implementations.

pub mod attempts;
pub mod cancel;
pub mod export;
pub mod init;
pub mod list;
pub mod result;
pub mod stats;
pub mod status;
pub mod submit;
pub mod worker;
