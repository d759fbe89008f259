//! Daemon configuration

use anyhow::{Context, Result};
use provisioner_lib::autoscale::{AutoscaleConfig, NodeCommandConfig};
use provisioner_lib::placement::PlacementConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "PROVISIONER_CONFIG";

/// Catalog and preference sources
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON array of instance offerings
    pub catalog_path: Option<PathBuf>,
    /// JSON allow-list preferences
    pub preferences_path: Option<PathBuf>,
    pub default_region: String,
    /// Reload the files when they change
    pub watch: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            preferences_path: None,
            default_region: "us-east-1".to_string(),
            watch: true,
        }
    }
}

/// Cluster access
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KubeConfig {
    /// Run without a cluster; cycles find no nodes and no pods
    pub disabled: bool,
}

/// Provisioner daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Name reported in structured logs
    pub instance_name: String,
    /// API server port for health, metrics and management
    pub api_port: u16,
    /// Namespace watched for pending pods
    pub namespace: String,
    pub cycle_interval_secs: u64,
    pub autoscale: AutoscaleConfig,
    pub placement: PlacementConfig,
    pub catalog: CatalogConfig,
    pub node_commands: NodeCommandConfig,
    pub kube: KubeConfig,
}

fn default_instance_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "compute-provisioner".to_string())
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: 8080,
            namespace: "default".to_string(),
            cycle_interval_secs: 10,
            autoscale: AutoscaleConfig::default(),
            placement: PlacementConfig::default(),
            catalog: CatalogConfig::default(),
            node_commands: NodeCommandConfig::default(),
            kube: KubeConfig::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Load from the optional config file, then `PROVISIONER__*` overrides
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(file)
    }

    pub fn load_from(file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("PROVISIONER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let mut parsed: Self = config
            .try_deserialize()
            .context("Invalid provisioner configuration")?;

        // The placement namespace follows the watched namespace unless set explicitly
        if parsed.placement.namespace == PlacementConfig::default().namespace {
            parsed.placement.namespace = parsed.namespace.clone();
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ProvisionerConfig::load_from(None).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.cycle_interval_secs, 10);
        assert_eq!(config.autoscale.max_spot_attempts, 1);
        assert_eq!(config.catalog.default_region, "us-east-1");
    }

    #[test]
    fn test_file_sections() {
        let file = write_config(
            r#"
namespace = "pipelines"
cycle_interval_secs = 5

[autoscale]
max_node_up_retries = 2
default_instance_type = "c5.large"

[catalog]
catalog_path = "/etc/provisioner/catalog.json"
default_region = "eu-west-1"

[node_commands]
node_up_command = "/opt/nodeup.sh"
"#,
        );
        let config = ProvisionerConfig::load_from(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.cycle_interval_secs, 5);
        assert_eq!(config.autoscale.max_node_up_retries, 2);
        assert_eq!(config.autoscale.default_instance_type, "c5.large");
        assert_eq!(config.autoscale.max_spot_attempts, 1);
        assert_eq!(config.catalog.default_region, "eu-west-1");
        assert_eq!(config.node_commands.node_up_command, "/opt/nodeup.sh");
        assert_eq!(config.placement.namespace, "pipelines");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = write_config("cycle_interval_secs = \"often\"\n");
        assert!(ProvisionerConfig::load_from(Some(file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let missing = PathBuf::from("/nonexistent/provisioner.toml");
        assert!(ProvisionerConfig::load_from(Some(missing)).is_err());
    }
}
