//! Resource requests and limits for the root container of a run

use super::builder::PlacementConfig;
use super::env_flags;
use crate::models::InstanceOffering;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

const MIB_PER_GB: f64 = 1024.0;
/// Floor for node-sized memory
const MIN_NODE_SIZED_MIB: u64 = 1024;

/// How container memory is derived from the instance shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryPolicy {
    /// No memory request or limit
    NoLimit,
    /// Request and limit set to node memory minus the system reserve
    #[default]
    NodeSized,
    /// Request a fraction of node memory, no limit
    RequestOnly,
}

impl MemoryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPolicy::NoLimit => "no-limit",
            MemoryPolicy::NodeSized => "node-sized",
            MemoryPolicy::RequestOnly => "request-only",
        }
    }

    /// Look up a policy by name; unknown names fall back to the default policy
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "no-limit" => MemoryPolicy::NoLimit,
            "node-sized" => MemoryPolicy::NodeSized,
            "request-only" => MemoryPolicy::RequestOnly,
            other => {
                warn!(policy = %other, fallback = %MemoryPolicy::default(), "Unknown memory policy");
                MemoryPolicy::default()
            }
        }
    }

    /// (requests, limits) memory quantities for an instance
    fn memory(
        &self,
        offering: &InstanceOffering,
        config: &PlacementConfig,
    ) -> (Option<Quantity>, Option<Quantity>) {
        let node_mib = offering.memory_gb * MIB_PER_GB;
        match self {
            MemoryPolicy::NoLimit => (None, None),
            MemoryPolicy::NodeSized => {
                let reserve_mib = config.memory_reserve_gb * MIB_PER_GB;
                let mib = ((node_mib - reserve_mib).floor().max(0.0) as u64).max(MIN_NODE_SIZED_MIB);
                let quantity = mebibytes(mib);
                (Some(quantity.clone()), Some(quantity))
            }
            MemoryPolicy::RequestOnly => {
                let mib = (node_mib * config.memory_request_ratio).floor().max(0.0) as u64;
                (Some(mebibytes(mib)), None)
            }
        }
    }
}

impl fmt::Display for MemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn mebibytes(mib: u64) -> Quantity {
    Quantity(format!("{}Mi", mib))
}

/// CPU request: a numeric positive per-run override, else the configured default
pub fn cpu_request(env: &BTreeMap<String, String>, default_cpu: &str) -> String {
    env.get(env_flags::CPU_REQUEST)
        .map(|raw| raw.trim())
        .filter(|raw| raw.parse::<f64>().is_ok_and(|v| v.is_finite() && v > 0.0))
        .unwrap_or(default_cpu)
        .to_string()
}

/// Requests and limits for a root container
pub fn root_resources(
    offering: &InstanceOffering,
    config: &PlacementConfig,
    env: &BTreeMap<String, String>,
) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();

    requests.insert(
        "cpu".to_string(),
        Quantity(cpu_request(env, &config.default_cpu_request)),
    );

    let policy = MemoryPolicy::from_name(&config.memory_policy);
    let (memory_request, memory_limit) = policy.memory(offering, config);
    if let Some(quantity) = memory_request {
        requests.insert("memory".to_string(), quantity);
    }
    if let Some(quantity) = memory_limit {
        limits.insert("memory".to_string(), quantity);
    }

    ResourceRequirements {
        requests: Some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceModel;
    use chrono::Utc;

    fn offering(memory_gb: f64) -> InstanceOffering {
        InstanceOffering {
            instance_type: "m5.large".into(),
            region: "us-east-1".into(),
            price_model: PriceModel::OnDemand,
            vcpu: 2,
            memory_gb,
            gpu_count: 0,
            price_per_unit: 0.096,
            sku: String::new(),
            published_at: Utc::now(),
        }
    }

    fn env(value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(env_flags::CPU_REQUEST.to_string(), value.to_string())])
    }

    #[test]
    fn test_cpu_override() {
        assert_eq!(cpu_request(&env("3"), "1"), "3");
        assert_eq!(cpu_request(&env(" 0.5 "), "1"), "0.5");
        assert_eq!(cpu_request(&env("three"), "1"), "1");
        assert_eq!(cpu_request(&env("-2"), "1"), "1");
        assert_eq!(cpu_request(&env("0"), "1"), "1");
        assert_eq!(cpu_request(&BTreeMap::new(), "2"), "2");
    }

    #[test]
    fn test_policy_lookup() {
        assert_eq!(MemoryPolicy::from_name("no-limit"), MemoryPolicy::NoLimit);
        assert_eq!(MemoryPolicy::from_name("REQUEST_ONLY"), MemoryPolicy::RequestOnly);
        assert_eq!(MemoryPolicy::from_name("bogus"), MemoryPolicy::NodeSized);
    }

    #[test]
    fn test_node_sized_memory() {
        let config = PlacementConfig::default();
        let (request, limit) = MemoryPolicy::NodeSized.memory(&offering(8.0), &config);
        assert_eq!(request, Some(Quantity("7168Mi".into())));
        assert_eq!(request, limit);

        // never below the floor
        let (request, _) = MemoryPolicy::NodeSized.memory(&offering(0.5), &config);
        assert_eq!(request, Some(Quantity("1024Mi".into())));
    }

    #[test]
    fn test_request_only_memory() {
        let config = PlacementConfig::default();
        let (request, limit) = MemoryPolicy::RequestOnly.memory(&offering(10.0), &config);
        assert_eq!(request, Some(Quantity("8192Mi".into())));
        assert!(limit.is_none());
    }

    #[test]
    fn test_no_limit_policy_sets_only_cpu() {
        let config = PlacementConfig {
            memory_policy: "no-limit".into(),
            ..Default::default()
        };
        let resources = root_resources(&offering(8.0), &config, &env("3"));
        let requests = resources.requests.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests["cpu"], Quantity("3".into()));
        assert!(resources.limits.is_none());
    }
}
