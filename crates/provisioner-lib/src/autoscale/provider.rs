//! Collaborators of the autoscale coordinator
//!
//! Everything the control loop touches outside its own process sits behind
//! one of these traits, so tests and alternative backends can swap them.

use crate::error::Result;
use crate::models::{ClusterNode, InstanceSpec, RunRecord, ScaleAttemptState, UnschedulablePod};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::{BTreeMap, HashSet};

/// Cluster API used to observe nodes and pods and to submit placements
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Nodes matching a label selector
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<ClusterNode>>;

    /// Pending pods the scheduler could not place
    async fn list_unschedulable_pods(&self, label_selector: &str) -> Result<Vec<UnschedulablePod>>;

    /// Create the pod; an already existing pod counts as accepted
    async fn submit_placement(&self, pod: Pod) -> Result<()>;
}

/// Cloud-side capacity operations
#[async_trait]
pub trait NodeProvisioner: Send + Sync {
    /// Request a node for a run; a failure is a `ProviderTransient` error
    async fn scale_up_node(&self, spec: &InstanceSpec) -> Result<()>;

    /// Release the node assigned to a run
    async fn scale_down_node(&self, run_id: &str) -> Result<()>;
}

/// Run records owned by the wider platform
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Fail a run with a user-visible reason
    async fn mark_failed(&self, run_id: &str, reason: &str) -> Result<()>;

    async fn upsert_run(&self, run: RunRecord) -> Result<()>;

    async fn list_runs(&self) -> Result<Vec<RunRecord>>;
}

/// Scale-up counters per pending workload
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Current counters; zeroes for an unknown run
    async fn get(&self, run_id: &str) -> ScaleAttemptState;

    /// Count one failed scale-up and return the updated counters
    async fn record_failure(&self, run_id: &str, spot: bool) -> ScaleAttemptState;

    async fn clear(&self, run_id: &str);

    /// Drop counters of runs that are no longer pending
    async fn retain(&self, pending: &HashSet<String>);

    async fn snapshot(&self) -> BTreeMap<String, ScaleAttemptState>;
}
