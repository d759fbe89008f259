//! Node provisioning through external commands
//!
//! The cloud-specific work lives in operator-supplied executables. Scale-up
//! is invoked as `<command> <args...> <run_id> <instance_type> <disk_gb>
//! <region> <spot|on_demand> [parent_id]`, scale-down as
//! `<command> <args...> <run_id>`.

use super::provider::NodeProvisioner;
use crate::error::{ProvisionError, Result};
use crate::models::InstanceSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt carried in an error
const MAX_STDERR_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCommandConfig {
    pub node_up_command: String,
    pub node_up_args: Vec<String>,
    pub node_down_command: String,
    pub node_down_args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for NodeCommandConfig {
    fn default() -> Self {
        Self {
            node_up_command: "nodeup".to_string(),
            node_up_args: Vec::new(),
            node_down_command: "nodedown".to_string(),
            node_down_args: Vec::new(),
            timeout_secs: 900,
        }
    }
}

pub struct CommandNodeProvisioner {
    config: NodeCommandConfig,
}

impl CommandNodeProvisioner {
    pub fn new(config: NodeCommandConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    async fn invoke(&self, run_id: &str, program: &str, args: Vec<String>) -> Result<()> {
        let transient = |message: String| ProvisionError::ProviderTransient {
            run_id: run_id.to_string(),
            message,
        };

        debug!(run_id = %run_id, program = %program, args = ?args, "Invoking node command");
        let output = tokio::time::timeout(
            self.timeout(),
            Command::new(program).args(&args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| transient(format!("{} timed out after {}s", program, self.config.timeout_secs)))?
        .map_err(|e| transient(format!("failed to run {}: {}", program, e)))?;

        check_exit(program, &output).map_err(transient)
    }
}

fn check_exit(program: &str, output: &Output) -> std::result::Result<(), String> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let excerpt: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
    Err(format!("{} exited with {}: {}", program, output.status, excerpt))
}

#[async_trait]
impl NodeProvisioner for CommandNodeProvisioner {
    async fn scale_up_node(&self, spec: &InstanceSpec) -> Result<()> {
        let mut args = self.config.node_up_args.clone();
        args.extend([
            spec.run_id.clone(),
            spec.instance_type.clone(),
            spec.disk_gb.to_string(),
            spec.region.clone(),
            spec.price_model.to_string(),
        ]);
        if let Some(parent) = &spec.parent_id {
            args.push(parent.clone());
        }
        self.invoke(&spec.run_id, &self.config.node_up_command, args)
            .await
    }

    async fn scale_down_node(&self, run_id: &str) -> Result<()> {
        let mut args = self.config.node_down_args.clone();
        args.push(run_id.to_string());
        self.invoke(run_id, &self.config.node_down_command, args)
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::PriceModel;

    fn spec() -> InstanceSpec {
        InstanceSpec {
            run_id: "77".into(),
            instance_type: "m5.large".into(),
            disk_gb: 50,
            region: "us-east-1".into(),
            price_model: PriceModel::Spot,
            parent_id: None,
        }
    }

    fn shell(script: &str, timeout_secs: u64) -> CommandNodeProvisioner {
        CommandNodeProvisioner::new(NodeCommandConfig {
            node_up_command: "sh".into(),
            node_up_args: vec!["-c".into(), script.into(), "nodeup".into()],
            node_down_command: "sh".into(),
            node_down_args: vec!["-c".into(), script.into(), "nodedown".into()],
            timeout_secs,
        })
    }

    #[tokio::test]
    async fn test_arguments_passed_in_order() {
        let provisioner = shell(
            r#"[ "$1" = 77 ] && [ "$2" = m5.large ] && [ "$3" = 50 ] && [ "$5" = spot ]"#,
            10,
        );
        assert!(provisioner.scale_up_node(&spec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_transient() {
        let provisioner = shell("echo 'no capacity' >&2; exit 3", 10);
        let err = provisioner.scale_up_node(&spec()).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(err.to_string().contains("no capacity"));
    }

    #[tokio::test]
    async fn test_missing_program_is_transient() {
        let provisioner = CommandNodeProvisioner::new(NodeCommandConfig {
            node_up_command: "/nonexistent/nodeup".into(),
            ..Default::default()
        });
        let err = provisioner.scale_up_node(&spec()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ProviderTransient { .. }));
    }

    #[tokio::test]
    async fn test_scale_down_passes_run_id() {
        let provisioner = shell(r#"[ "$1" = 77 ]"#, 10);
        assert!(provisioner.scale_down_node("77").await.is_ok());
        assert!(provisioner.scale_down_node("78").await.is_err());
    }
}
