//! Core data models for the provisioner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Well-known pod and node labels shared by the coordinator and the placement builder
pub mod labels {
    pub const RUN_ID: &str = "runid";
    pub const OWNER: &str = "owner";
    pub const SPAWNED_BY: &str = "spawned_by";
    pub const SPAWNED_BY_VALUE: &str = "pipeline";
    pub const SENSITIVE: &str = "sensitive";
    pub const POD_TYPE: &str = "type";
    pub const ROOT_POD_TYPE: &str = "pipeline";
    pub const WORKER_POD_TYPE: &str = "worker";
    /// Label carried by every node this platform provisions
    pub const NODE_SELECTOR: &str = "cloud-pipeline/node";
}

/// Instance pricing model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceModel {
    #[serde(alias = "SPOT")]
    Spot,
    #[serde(alias = "ON_DEMAND", alias = "on-demand")]
    OnDemand,
}

impl PriceModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceModel::Spot => "spot",
            PriceModel::OnDemand => "on_demand",
        }
    }
}

impl fmt::Display for PriceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "spot" => Ok(PriceModel::Spot),
            "on_demand" | "ondemand" => Ok(PriceModel::OnDemand),
            other => Err(format!("unknown price model '{}'", other)),
        }
    }
}

/// A purchasable compute shape; one row of the instance catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOffering {
    #[serde(rename = "type")]
    pub instance_type: String,
    pub region: String,
    pub price_model: PriceModel,
    #[serde(rename = "vCPU")]
    pub vcpu: u32,
    #[serde(rename = "memoryGB")]
    pub memory_gb: f64,
    #[serde(default)]
    pub gpu_count: u32,
    pub price_per_unit: f64,
    #[serde(default)]
    pub sku: String,
    pub published_at: DateTime<Utc>,
}

/// Container platform of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformOs {
    #[default]
    Linux,
    Windows,
}

/// Lifecycle status of a run record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Stopped
        )
    }
}

/// Compute a run asked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInstance {
    pub node_type: String,
    pub disk_gb: u32,
    #[serde(default)]
    pub spot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
}

/// Run record as kept by the platform's persistence layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub pod_id: String,
    pub owner: String,
    pub docker_image: String,
    pub launch_command: String,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    pub instance: RunInstance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub platform: PlatformOs,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl RunRecord {
    /// The main pod of a run carries the run id as its pod id
    pub fn is_root_pod(&self) -> bool {
        self.pod_id == self.id
    }

    /// Run id whose node this run is placed on
    pub fn node_assignment_id(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(&self.id)
    }
}

/// A run waiting for a node, derived from its unschedulable pods
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingWorkload {
    pub run_id: String,
    pub pod_name: String,
    pub namespace: String,
}

/// Per-workload scale-up counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleAttemptState {
    pub total_attempts: u32,
    pub spot_attempts: u32,
}

/// Scale-up request handed to the node provisioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub run_id: String,
    pub instance_type: String,
    pub disk_gb: u32,
    pub region: String,
    pub price_model: PriceModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Cluster node as seen by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl ClusterNode {
    pub fn run_id(&self) -> Option<&str> {
        self.labels.get(labels::RUN_ID).map(String::as_str)
    }
}

/// Pod the scheduler could not place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnschedulablePod {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl UnschedulablePod {
    pub fn run_id(&self) -> Option<&str> {
        self.labels.get(labels::RUN_ID).map(String::as_str)
    }
}
