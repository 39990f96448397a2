//! Adapters implementing the domain ports.

pub mod github;
pub mod memory;
pub mod providers;
pub mod sqlite;
