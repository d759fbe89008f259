//! Volumes and mounts for pipeline pods
//!
//! Extra mounts come from configuration as `host:container[:ro]` entries
//! separated by `;` or newlines.

use super::builder::PlacementConfig;
use super::env_flags;
use crate::error::{ProvisionError, Result};
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, HostPathVolumeSource, Volume, VolumeMount,
};
use std::collections::BTreeMap;

/// One bind mount from a configured mount list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Parse a mount list; any malformed entry fails the whole list
pub fn parse_mount_list(raw: &str) -> Result<Vec<MountSpec>> {
    raw.split(|c| c == ';' || c == '\n')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_mount)
        .collect()
}

fn parse_mount(entry: &str) -> Result<MountSpec> {
    let malformed = || {
        ProvisionError::ConfigurationFatal(format!(
            "malformed mount '{}', expected host:container[:ro]",
            entry
        ))
    };

    let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
    let (host_path, container_path, read_only) = match parts.as_slice() {
        [host, container] => (*host, *container, false),
        [host, container, "ro"] => (*host, *container, true),
        [host, container, "rw"] => (*host, *container, false),
        _ => return Err(malformed()),
    };

    if host_path.is_empty() || !container_path.starts_with('/') {
        return Err(malformed());
    }

    Ok(MountSpec {
        host_path: host_path.to_string(),
        container_path: container_path.to_string(),
        read_only,
    })
}

/// Volumes and their container mounts, kept in insertion order
#[derive(Debug, Default)]
pub struct VolumeSet {
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
}

impl VolumeSet {
    pub fn host_path(&mut self, name: &str, host_path: &str, mount_path: &str, read_only: bool) {
        self.volumes.push(Volume {
            name: name.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: host_path.to_string(),
                type_: None,
            }),
            ..Default::default()
        });
        self.mount(name, mount_path, read_only);
    }

    pub fn memory_dir(&mut self, name: &str, mount_path: &str) {
        self.volumes.push(Volume {
            name: name.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                size_limit: None,
            }),
            ..Default::default()
        });
        self.mount(name, mount_path, false);
    }

    fn mount(&mut self, name: &str, mount_path: &str, read_only: bool) {
        self.mounts.push(VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            read_only: read_only.then_some(true),
            ..Default::default()
        });
    }

    fn extend(&mut self, prefix: &str, specs: &[MountSpec]) {
        for (i, spec) in specs.iter().enumerate() {
            let name = format!("{}-{}", prefix, i);
            self.host_path(&name, &spec.host_path, &spec.container_path, spec.read_only);
        }
    }

    pub fn into_parts(self) -> (Vec<Volume>, Vec<VolumeMount>) {
        (self.volumes, self.mounts)
    }
}

/// Fixed Linux volumes plus configured and opt-in extras
pub fn linux_volumes(config: &PlacementConfig, env: &BTreeMap<String, String>) -> Result<VolumeSet> {
    let mut set = VolumeSet::default();
    set.host_path("ref-data", &config.ref_data_path, &config.ref_data_path, true);
    set.host_path("runs-data", &config.runs_data_path, &config.runs_data_path, false);
    set.memory_dir("dshm", "/dev/shm");

    set.extend("common", &parse_mount_list(&config.common_mounts)?);

    if config.dind_enabled && env_flags::is_set(env, env_flags::DIND_CONTAINER) {
        set.extend("dind", &parse_mount_list(&config.dind_mounts)?);
    }

    if config.init_system_enabled || env_flags::is_set(env, env_flags::INIT_SYSTEM_CONTAINER) {
        set.host_path("cgroup", "/sys/fs/cgroup", "/sys/fs/cgroup", true);
    }

    Ok(set)
}

/// Windows hosts only get the two data mounts
pub fn windows_volumes() -> VolumeSet {
    let mut set = VolumeSet::default();
    set.host_path("runs-data", r"C:\runs", r"C:\runs", false);
    set.host_path("ref-data", r"C:\ref", r"C:\ref", true);
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mount_list() {
        let mounts = parse_mount_list("/opt/tools:/opt/tools:ro; /scratch:/scratch\n/data:/data:rw").unwrap();
        assert_eq!(mounts.len(), 3);
        assert!(mounts[0].read_only);
        assert_eq!(mounts[1].container_path, "/scratch");
        assert!(!mounts[2].read_only);

        assert!(parse_mount_list("").unwrap().is_empty());
        assert!(parse_mount_list(" ;\n ").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_mounts() {
        for raw in ["/only-host", "/a:/b:rx", "/a:/b:ro:extra", ":/b", "/a:relative"] {
            let err = parse_mount_list(raw).unwrap_err();
            assert!(
                matches!(err, ProvisionError::ConfigurationFatal(_)),
                "expected fatal for {}",
                raw
            );
        }
    }

    #[test]
    fn test_windows_set_is_fixed() {
        let (volumes, mounts) = windows_volumes().into_parts();
        assert_eq!(volumes.len(), 2);
        assert_eq!(mounts[0].mount_path, r"C:\runs");
        assert_eq!(mounts[1].read_only, Some(true));
    }
}
