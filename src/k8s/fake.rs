//! In-memory [`ClusterApi`] double used by discovery-plugin and scanner
//! tests. Holds plain `Vec`s the test sets up directly; no k8s-openapi
//! types involved.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ClusterApi, ClusterApiError, ClusterResult, EndpointSliceInfo, IngressInfo, NodeAddress, PodReadiness, ServiceInfo, WorkloadInfo,
    APP_DEPLOY_MANAGER_LABEL,
};

#[derive(Default)]
pub struct FakeClusterApi {
    pub ingresses: Vec<IngressInfo>,
    pub endpoint_slices: Vec<EndpointSliceInfo>,
    pub deployments: Vec<WorkloadInfo>,
    pub statefulsets: Vec<WorkloadInfo>,
    pub services: Vec<ServiceInfo>,
    pub pod_readiness_by_namespace: BTreeMap<String, PodReadiness>,
    pub node_addresses: BTreeMap<String, NodeAddress>,
    pub labeled_namespaces: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_labels(&self, namespace: &str) -> Option<BTreeMap<String, String>> {
        self.labeled_namespaces.lock().expect("lock poisoned").get(namespace).cloned()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list_ingresses_all_namespaces(&self) -> ClusterResult<Vec<IngressInfo>> {
        Ok(self.ingresses.clone())
    }

    async fn list_ingresses(&self, namespace: &str) -> ClusterResult<Vec<IngressInfo>> {
        Ok(self.ingresses.iter().filter(|i| i.namespace == namespace).cloned().collect())
    }

    async fn list_ingresses_by_app_label(&self, namespace: &str, app_label_value: &str) -> ClusterResult<Vec<IngressInfo>> {
        Ok(self
            .ingresses
            .iter()
            .filter(|i| i.namespace == namespace && i.labels.get(APP_DEPLOY_MANAGER_LABEL).map(|v| v.as_str()) == Some(app_label_value))
            .cloned()
            .collect())
    }

    async fn list_endpoint_slices_all_namespaces(&self) -> ClusterResult<Vec<EndpointSliceInfo>> {
        Ok(self.endpoint_slices.clone())
    }

    async fn list_deployments_all_namespaces(&self) -> ClusterResult<Vec<WorkloadInfo>> {
        Ok(self.deployments.clone())
    }

    async fn list_statefulsets_all_namespaces(&self) -> ClusterResult<Vec<WorkloadInfo>> {
        Ok(self.statefulsets.clone())
    }

    async fn list_services_all_namespaces(&self) -> ClusterResult<Vec<ServiceInfo>> {
        Ok(self.services.clone())
    }

    async fn list_pods_by_selector(&self, namespace: &str, _selector: &BTreeMap<String, String>) -> ClusterResult<PodReadiness> {
        Ok(self.pod_readiness_by_namespace.get(namespace).copied().unwrap_or_default())
    }

    async fn node_address(&self, node_name: &str) -> ClusterResult<NodeAddress> {
        self.node_addresses.get(node_name).cloned().ok_or_else(|| ClusterApiError::NotFound(node_name.to_string()))
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<NodeAddress>> {
        Ok(self.node_addresses.values().cloned().collect())
    }

    async fn label_namespace(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<()> {
        self.labeled_namespaces
            .lock()
            .expect("lock poisoned")
            .entry(namespace.to_string())
            .or_default()
            .extend(labels.clone());
        Ok(())
    }
}
