//! Placement descriptors for pipeline runs
//!
//! Turns a run record and its resolved instance into the Kubernetes `Pod`
//! submitted to the cluster. Building is a pure transform: identical inputs
//! give identical pods, and the only failure is malformed configuration.

mod builder;
mod labels;
mod resources;
mod volumes;


pub use builder::{DnsSettings, PlacementBuilder, PlacementConfig, PlacementRequest, CONTAINER_NAME};
pub use labels::{pod_labels, sanitize_owner};
pub use resources::{cpu_request, root_resources, MemoryPolicy};
pub use volumes::{parse_mount_list, MountSpec};

/// Per-run environment switches read by the builder
pub mod env_flags {
    use std::collections::BTreeMap;

    pub const CPU_REQUEST: &str = "CP_CPU_REQUEST";
    pub const USE_HOST_NETWORK: &str = "CP_USE_HOST_NETWORK";
    pub const DIND_CONTAINER: &str = "CP_CAP_DIND_CONTAINER";
    pub const INIT_SYSTEM_CONTAINER: &str = "CP_CAP_SYSTEMD_CONTAINER";

    /// `true`, `yes`, `on` or `1`, case-insensitive
    pub fn is_truthy(value: &str) -> bool {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "on" | "1"
        )
    }

    pub fn is_set(env: &BTreeMap<String, String>, name: &str) -> bool {
        env.get(name).is_some_and(|v| is_truthy(v))
    }
}
