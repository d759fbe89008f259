//! Subcommand implementations

pub mod allowed;
pub mod attempts;
pub mod catalog;
pub mod config;
pub mod runs;
