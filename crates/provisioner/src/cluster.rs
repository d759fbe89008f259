//! Cluster backend selection

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use provisioner_lib::autoscale::ClusterClient;
use provisioner_lib::{ClusterNode, ProvisionError, Result, UnschedulablePod};

/// Stand-in used when cluster access is disabled
///
/// Reports an empty cluster, so cycles never scale and only the management
/// API is useful.
pub struct DetachedCluster;

#[async_trait]
impl ClusterClient for DetachedCluster {
    async fn list_nodes(&self, _label_selector: &str) -> Result<Vec<ClusterNode>> {
        Ok(Vec::new())
    }

    async fn list_unschedulable_pods(&self, _label_selector: &str) -> Result<Vec<UnschedulablePod>> {
        Ok(Vec::new())
    }

    async fn submit_placement(&self, pod: Pod) -> Result<()> {
        Err(ProvisionError::Placement(format!(
            "{}: cluster access is disabled",
            pod.metadata.name.unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_cluster_is_empty() {
        let cluster = DetachedCluster;
        assert!(cluster.list_nodes("any").await.unwrap().is_empty());
        assert!(cluster.list_unschedulable_pods("any").await.unwrap().is_empty());
        assert!(cluster.submit_placement(Pod::default()).await.is_err());
    }
}
