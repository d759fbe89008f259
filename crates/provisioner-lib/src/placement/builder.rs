//! Pod construction for pipeline runs

use super::env_flags;
use super::labels::pod_labels;
use super::resources::root_resources;
use super::volumes::{linux_volumes, windows_volumes};
use crate::error::Result;
use crate::models::{labels, InstanceOffering, PlatformOs, RunRecord};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, Pod, PodDNSConfig, PodSpec, SecurityContext, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the single container in every pipeline pod
pub const CONTAINER_NAME: &str = "pipeline";

/// Explicit DNS identity for pipeline pods
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    pub hostname: Option<String>,
    pub subdomain: Option<String>,
    pub searches: Vec<String>,
}

/// Placement configuration shared by all runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub namespace: String,
    /// When off, pods go to statically labelled nodes instead of per-run nodes
    pub autoscale_enabled: bool,
    pub static_node_selector: BTreeMap<String, String>,
    pub linux_entry_point: String,
    pub linux_arg_prefix: Vec<String>,
    pub image_pull_policy: String,
    pub default_cpu_request: String,
    /// One of `no-limit`, `node-sized`, `request-only`
    pub memory_policy: String,
    pub memory_reserve_gb: f64,
    pub memory_request_ratio: f64,
    pub ref_data_path: String,
    pub runs_data_path: String,
    pub common_mounts: String,
    /// Admin switch for container-in-container mounts; runs still have to opt in
    pub dind_enabled: bool,
    pub dind_mounts: String,
    pub init_system_enabled: bool,
    pub dns_enabled: bool,
    pub dns: DnsSettings,
    /// Taint key to value; a blank value tolerates any value
    pub tolerations: BTreeMap<String, String>,
    pub termination_grace_period_secs: i64,
    pub service_account: Option<String>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            autoscale_enabled: true,
            static_node_selector: BTreeMap::from([(
                "node-role".to_string(),
                "pipeline".to_string(),
            )]),
            linux_entry_point: "/bin/bash".to_string(),
            linux_arg_prefix: vec!["-c".to_string()],
            image_pull_policy: "Always".to_string(),
            default_cpu_request: "1".to_string(),
            memory_policy: "node-sized".to_string(),
            memory_reserve_gb: 1.0,
            memory_request_ratio: 0.8,
            ref_data_path: "/ebs/reference".to_string(),
            runs_data_path: "/ebs/runs".to_string(),
            common_mounts: String::new(),
            dind_enabled: false,
            dind_mounts: "/var/run/docker.sock:/var/run/docker.sock;/usr/bin/docker:/usr/bin/docker:ro"
                .to_string(),
            init_system_enabled: false,
            dns_enabled: false,
            dns: DnsSettings::default(),
            tolerations: BTreeMap::new(),
            termination_grace_period_secs: 30,
            service_account: None,
        }
    }
}

/// Everything needed to place one run
#[derive(Debug, Clone, Copy)]
pub struct PlacementRequest<'a> {
    pub run: &'a RunRecord,
    pub offering: &'a InstanceOffering,
    pub launch_command: &'a str,
    pub env_vars: &'a BTreeMap<String, String>,
    pub platform: PlatformOs,
    /// Run whose node the pod lands on: the run itself or its parent
    pub node_run_id: &'a str,
}

impl<'a> PlacementRequest<'a> {
    /// Request using the run's own command, env and platform
    pub fn for_run(run: &'a RunRecord, offering: &'a InstanceOffering) -> Self {
        Self {
            run,
            offering,
            launch_command: &run.launch_command,
            env_vars: &run.env_vars,
            platform: run.platform,
            node_run_id: run.node_assignment_id(),
        }
    }
}

/// Builds pipeline pods; stateless apart from its configuration
#[derive(Debug, Clone, Default)]
pub struct PlacementBuilder {
    config: PlacementConfig,
}

impl PlacementBuilder {
    pub fn new(config: PlacementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    pub fn build(&self, request: &PlacementRequest<'_>) -> Result<Pod> {
        let config = &self.config;
        let run = request.run;

        let (volumes, volume_mounts) = match request.platform {
            PlatformOs::Linux => linux_volumes(config, request.env_vars)?,
            PlatformOs::Windows => windows_volumes(),
        }
        .into_parts();

        let (command, args) = match request.platform {
            PlatformOs::Windows => (
                vec!["powershell".to_string()],
                vec!["-command".to_string(), request.launch_command.to_string()],
            ),
            PlatformOs::Linux => {
                let mut args = config.linux_arg_prefix.clone();
                args.push(request.launch_command.to_string());
                (vec![config.linux_entry_point.clone()], args)
            }
        };

        let resources = run
            .is_root_pod()
            .then(|| root_resources(request.offering, config, request.env_vars));

        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(run.docker_image.clone()),
            image_pull_policy: Some(config.image_pull_policy.clone()),
            command: Some(command),
            args: Some(args),
            env: Some(env_vars(request.env_vars)),
            resources,
            volume_mounts: Some(volume_mounts),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (node_selector, affinity) = self.node_placement(request);
        let dns = config.dns_enabled.then_some(&config.dns);

        let spec = PodSpec {
            containers: vec![container],
            volumes: Some(volumes),
            node_selector,
            affinity,
            tolerations: self.tolerations(),
            restart_policy: Some("Never".to_string()),
            termination_grace_period_seconds: Some(config.termination_grace_period_secs),
            service_account_name: config.service_account.clone(),
            host_network: env_flags::is_set(request.env_vars, env_flags::USE_HOST_NETWORK)
                .then_some(true),
            hostname: dns.and_then(|d| d.hostname.clone()),
            subdomain: dns.and_then(|d| d.subdomain.clone()),
            dns_config: dns.filter(|d| !d.searches.is_empty()).map(|d| PodDNSConfig {
                searches: Some(d.searches.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(run.pod_id.clone()),
                namespace: Some(config.namespace.clone()),
                labels: Some(pod_labels(run, config.autoscale_enabled)),
                ..Default::default()
            },
            spec: Some(spec),
            status: None,
        })
    }

    /// Node selector or affinity, depending on autoscaling and platform
    fn node_placement(
        &self,
        request: &PlacementRequest<'_>,
    ) -> (Option<BTreeMap<String, String>>, Option<Affinity>) {
        if !self.config.autoscale_enabled {
            return (Some(self.config.static_node_selector.clone()), None);
        }

        match request.platform {
            PlatformOs::Linux => (
                Some(BTreeMap::from([(
                    labels::RUN_ID.to_string(),
                    request.node_run_id.to_string(),
                )])),
                None,
            ),
            PlatformOs::Windows => {
                let term = NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: labels::RUN_ID.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![request.node_run_id.to_string()]),
                    }]),
                    ..Default::default()
                };
                let affinity = Affinity {
                    node_affinity: Some(NodeAffinity {
                        required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                            node_selector_terms: vec![term],
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                (None, Some(affinity))
            }
        }
    }

    fn tolerations(&self) -> Option<Vec<Toleration>> {
        if self.config.tolerations.is_empty() {
            return None;
        }

        let tolerations = self
            .config
            .tolerations
            .iter()
            .map(|(key, value)| {
                let value = value.trim();
                if value.is_empty() {
                    Toleration {
                        key: Some(key.clone()),
                        operator: Some("Exists".to_string()),
                        ..Default::default()
                    }
                } else {
                    Toleration {
                        key: Some(key.clone()),
                        operator: Some("Equal".to_string()),
                        value: Some(value.to_string()),
                        ..Default::default()
                    }
                }
            })
            .collect();
        Some(tolerations)
    }
}

/// Environment in name order
fn env_vars(vars: &BTreeMap<String, String>) -> Vec<EnvVar> {
    vars.iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect()
}
