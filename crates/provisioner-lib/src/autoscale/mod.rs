//! Autoscaling of pipeline nodes
//!
//! `AutoscaleCoordinator` runs the periodic control loop. Its collaborators
//! (cluster API, node provisioner, run store, attempt counters) are traits in
//! `provider`, with a Kubernetes client, a command-driven provisioner and
//! in-memory stores as the shipped implementations.

mod attempts;
mod coordinator;
mod kube_client;
mod nodeup;
mod pending;
pub mod provider;
mod run_store;


pub use attempts::InMemoryAttemptStore;
pub use coordinator::{
    AutoscaleConfig, AutoscaleCoordinator, AutoscaleCoordinatorBuilder, CycleReport,
    CAPACITY_UNAVAILABLE,
};
pub use kube_client::KubeClusterClient;
pub use nodeup::{CommandNodeProvisioner, NodeCommandConfig};
pub use pending::{lacks_capacity, pending_workloads, UNSCHEDULABLE_REASON};
pub use provider::{AttemptStore, ClusterClient, NodeProvisioner, RunStore};
pub use run_store::InMemoryRunStore;
