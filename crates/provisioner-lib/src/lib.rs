//! Provisioner library for pipeline compute capacity
//!
//! This crate provides the core functionality for:
//! - Instance catalog and allow-policy resolution
//! - Pod placement spec construction for Linux and Windows workloads
//! - The autoscale control loop with spot to on-demand escalation
//! - Health checks and observability

pub mod autoscale;
pub mod catalog;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod placement;

pub use error::{ProvisionError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ProvisionerMetrics, StructuredLogger};
