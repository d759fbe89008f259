//! Compute provisioner daemon: configuration, cluster wiring and HTTP API

pub mod api;
pub mod cluster;
pub mod config;
