//! Kubernetes-backed cluster client

use super::provider::ClusterClient;
use crate::error::{ProvisionError, Result};
use crate::models::{ClusterNode, UnschedulablePod};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use tracing::debug;

/// HTTP status returned when the pod already exists
const CONFLICT: u16 = 409;

pub struct KubeClusterClient {
    client: Client,
    namespace: String,
}

impl KubeClusterClient {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Client from in-cluster config or the local kubeconfig
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ProvisionError::Cluster(format!("failed to create client: {}", e)))?;
        Ok(Self::new(client, namespace))
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace.unwrap_or(&self.namespace))
    }
}

/// Scheduler verdict carried by the `PodScheduled` condition
fn scheduling_condition(pod: &Pod) -> Option<(Option<String>, Option<String>)> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "PodScheduled" && c.status == "False")
        .map(|c| (c.reason.clone(), c.message.clone()))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<ClusterNode>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| ProvisionError::Cluster(e.to_string()))?;

        Ok(nodes
            .items
            .into_iter()
            .map(|node| ClusterNode {
                name: node.metadata.name.unwrap_or_default(),
                labels: node.metadata.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_unschedulable_pods(&self, label_selector: &str) -> Result<Vec<UnschedulablePod>> {
        let params = ListParams::default()
            .labels(label_selector)
            .fields("status.phase=Pending");
        let pods = self
            .pods(None)
            .list(&params)
            .await
            .map_err(|e| ProvisionError::Cluster(e.to_string()))?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| {
                let (reason, message) = scheduling_condition(&pod)?;
                Some(UnschedulablePod {
                    name: pod.metadata.name.unwrap_or_default(),
                    namespace: pod
                        .metadata
                        .namespace
                        .unwrap_or_else(|| self.namespace.clone()),
                    labels: pod.metadata.labels.unwrap_or_default(),
                    reason,
                    message,
                })
            })
            .collect())
    }

    async fn submit_placement(&self, pod: Pod) -> Result<()> {
        let namespace = pod.metadata.namespace.clone();
        let name = pod.metadata.name.clone().unwrap_or_default();

        match self
            .pods(namespace.as_deref())
            .create(&PostParams::default(), &pod)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == CONFLICT => {
                debug!(pod = %name, "Pod already exists");
                Ok(())
            }
            Err(e) => Err(ProvisionError::Placement(format!("{}: {}", name, e))),
        }
    }
}
