//! Provisioning error types

use thiserror::Error;

/// Errors raised while acquiring capacity for a workload.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Requested instance type is not offered in the resolved region
    #[error("instance type '{instance_type}' is not offered in region '{region}'")]
    CatalogMiss {
        instance_type: String,
        region: String,
    },

    /// Instance type or price model is outside the resolved allow-list
    #[error("instance type '{instance_type}' denied by policy: {reason}")]
    PolicyDenied {
        instance_type: String,
        reason: String,
    },

    /// Scale-up call failed; retried on a later cycle
    #[error("scale-up for run {run_id} failed: {message}")]
    ProviderTransient { run_id: String, message: String },

    /// Retry budget used up; the owning run is failed
    #[error("run {run_id} exhausted its scale-up budget after {total_attempts} attempts")]
    BudgetExhausted { run_id: String, total_attempts: u32 },

    /// Missing or malformed preference
    #[error("configuration error: {0}")]
    ConfigurationFatal(String),

    #[error("cluster API error: {0}")]
    Cluster(String),

    #[error("placement rejected: {0}")]
    Placement(String),

    #[error("run not found: {0}")]
    RunNotFound(String),
}

impl ProvisionError {
    /// Whether the same request may succeed on a later cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisionError::ProviderTransient { .. }
                | ProvisionError::Cluster(_)
                | ProvisionError::Placement(_)
        )
    }

    /// Short machine-readable kind, used as a metrics/log label
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::CatalogMiss { .. } => "catalog_miss",
            ProvisionError::PolicyDenied { .. } => "policy_denied",
            ProvisionError::ProviderTransient { .. } => "provider_transient",
            ProvisionError::BudgetExhausted { .. } => "budget_exhausted",
            ProvisionError::ConfigurationFatal(_) => "configuration_fatal",
            ProvisionError::Cluster(_) => "cluster",
            ProvisionError::Placement(_) => "placement",
            ProvisionError::RunNotFound(_) => "run_not_found",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
