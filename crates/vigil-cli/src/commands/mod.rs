//! CLI command implementations

pub mod config;
