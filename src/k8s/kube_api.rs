//! `kube`-backed implementation of [`ClusterApi`].
//!
//! Thin adapter over `kube::Api<T>`, following the same direct
//! `Api<T>`/`Client` call style the rest of this crate's commands use.
//! No behavior lives here beyond translating k8s-openapi types into the
//! plain DTOs the rest of the core operates on.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;

use super::{
    ClusterApi, ClusterApiError, ClusterResult, EndpointSliceInfo, IngressInfo, NodeAddress, PodReadiness, ServiceInfo, ServiceKind,
    WorkloadInfo, APP_DEPLOY_MANAGER_LABEL,
};

pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> anyhow::Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }
}

fn labels_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> BTreeMap<String, String> {
    meta.labels.clone().unwrap_or_default().into_iter().collect()
}

fn creation_timestamp(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> chrono::DateTime<chrono::Utc> {
    meta.creation_timestamp.as_ref().map(|t| t.0).unwrap_or_else(chrono::Utc::now)
}

fn ingress_to_infos(ingress: &Ingress) -> Vec<IngressInfo> {
    let name = ingress.metadata.name.clone().unwrap_or_default();
    let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
    let labels = labels_of(&ingress.metadata);
    let created = creation_timestamp(&ingress.metadata);

    let mut out = Vec::new();
    let Some(spec) = &ingress.spec else { return out };
    let Some(rules) = &spec.rules else { return out };

    for rule in rules {
        let Some(host) = &rule.host else { continue };
        let Some(http) = &rule.http else { continue };
        let mut paths = Vec::new();
        let mut service_name = String::new();
        for path in &http.paths {
            paths.push(path.path.clone().unwrap_or_else(|| "/".to_string()));
            if let Some(backend_service) = &path.backend.service {
                service_name = backend_service.name.clone();
            }
        }
        if paths.is_empty() {
            paths.push("/".to_string());
        }
        out.push(IngressInfo {
            name: name.clone(),
            namespace: namespace.clone(),
            host: host.clone(),
            paths,
            service_name,
            labels: labels.clone(),
            creation_timestamp: created,
        });
    }
    out
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_ingresses_all_namespaces(&self) -> ClusterResult<Vec<IngressInfo>> {
        let api: Api<Ingress> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(list.items.iter().flat_map(ingress_to_infos).collect())
    }

    async fn list_ingresses(&self, namespace: &str) -> ClusterResult<Vec<IngressInfo>> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(list.items.iter().flat_map(ingress_to_infos).collect())
    }

    async fn list_ingresses_by_app_label(&self, namespace: &str, app_label_value: &str) -> ClusterResult<Vec<IngressInfo>> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{APP_DEPLOY_MANAGER_LABEL}={app_label_value}");
        let params = ListParams::default().labels(&selector);
        let list = api.list(&params).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(list.items.iter().flat_map(ingress_to_infos).collect())
    }

    async fn list_endpoint_slices_all_namespaces(&self) -> ClusterResult<Vec<EndpointSliceInfo>> {
        let api: Api<EndpointSlice> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(list
            .items
            .iter()
            .map(|slice| {
                let ready = slice
                    .endpoints
                    .iter()
                    .filter(|e| e.conditions.as_ref().and_then(|c| c.ready).unwrap_or(false))
                    .count() as u32;
                EndpointSliceInfo {
                    name: slice.metadata.name.clone().unwrap_or_default(),
                    namespace: slice.metadata.namespace.clone().unwrap_or_default(),
                    service_name: slice
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|l| l.get("kubernetes.io/service-name"))
                        .cloned()
                        .unwrap_or_default(),
                    ready_endpoint_count: ready,
                }
            })
            .collect())
    }

    async fn list_deployments_all_namespaces(&self) -> ClusterResult<Vec<WorkloadInfo>> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(list
            .items
            .iter()
            .map(|d| WorkloadInfo {
                name: d.metadata.name.clone().unwrap_or_default(),
                namespace: d.metadata.namespace.clone().unwrap_or_default(),
                labels: labels_of(&d.metadata),
                container_images: d
                    .spec
                    .as_ref()
                    .map(|s| s.template.spec.as_ref().map(|ps| ps.containers.iter().filter_map(|c| c.image.clone()).collect()).unwrap_or_default())
                    .unwrap_or_default(),
                creation_timestamp: creation_timestamp(&d.metadata),
            })
            .collect())
    }

    async fn list_statefulsets_all_namespaces(&self) -> ClusterResult<Vec<WorkloadInfo>> {
        let api: Api<StatefulSet> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(list
            .items
            .iter()
            .map(|s| WorkloadInfo {
                name: s.metadata.name.clone().unwrap_or_default(),
                namespace: s.metadata.namespace.clone().unwrap_or_default(),
                labels: labels_of(&s.metadata),
                container_images: s
                    .spec
                    .as_ref()
                    .map(|sp| sp.template.spec.as_ref().map(|ps| ps.containers.iter().filter_map(|c| c.image.clone()).collect()).unwrap_or_default())
                    .unwrap_or_default(),
                creation_timestamp: creation_timestamp(&s.metadata),
            })
            .collect())
    }

    async fn list_services_all_namespaces(&self) -> ClusterResult<Vec<ServiceInfo>> {
        let api: Api<Service> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(list
            .items
            .iter()
            .map(|s| {
                let spec = s.spec.as_ref();
                let kind = match spec.and_then(|sp| sp.type_.as_deref()) {
                    Some("NodePort") => ServiceKind::NodePort,
                    Some("LoadBalancer") => ServiceKind::LoadBalancer,
                    _ => ServiceKind::ClusterIp,
                };
                let node_ports = spec
                    .map(|sp| {
                        sp.ports
                            .as_ref()
                            .map(|ports| ports.iter().filter_map(|p| p.node_port.map(|np| (p.port, np))).collect())
                            .unwrap_or_default()
                    })
                    .unwrap_or_default();
                ServiceInfo {
                    name: s.metadata.name.clone().unwrap_or_default(),
                    namespace: s.metadata.namespace.clone().unwrap_or_default(),
                    kind,
                    labels: labels_of(&s.metadata),
                    node_ports,
                }
            })
            .collect())
    }

    async fn list_pods_by_selector(&self, namespace: &str, selector: &BTreeMap<String, String>) -> ClusterResult<PodReadiness> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector_str = selector.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
        let params = ListParams::default().labels(&selector_str);
        let list = api.list(&params).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;

        let pod_count = list.items.len() as u32;
        let ready_count = list
            .items
            .iter()
            .filter(|p| {
                p.status
                    .as_ref()
                    .and_then(|s| s.conditions.as_ref())
                    .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
                    .unwrap_or(false)
            })
            .count() as u32;

        Ok(PodReadiness { pod_count, ready_count })
    }

    async fn node_address(&self, node_name: &str) -> ClusterResult<NodeAddress> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api.get(node_name).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        let addresses = node.status.and_then(|s| s.addresses).unwrap_or_default();

        let external_ip = addresses.iter().find(|a| a.type_ == "ExternalIP").map(|a| a.address.clone());
        let internal_ip = addresses.iter().find(|a| a.type_ == "InternalIP").map(|a| a.address.clone());

        Ok(NodeAddress { external_ip, internal_ip })
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<NodeAddress>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(list
            .items
            .iter()
            .map(|node| {
                let addresses = node.status.as_ref().and_then(|s| s.addresses.clone()).unwrap_or_default();
                let external_ip = addresses.iter().find(|a| a.type_ == "ExternalIP").map(|a| a.address.clone());
                let internal_ip = addresses.iter().find(|a| a.type_ == "InternalIP").map(|a| a.address.clone());
                NodeAddress { external_ip, internal_ip }
            })
            .collect())
    }

    async fn label_namespace(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        api.patch(namespace, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterApiError::ApiError(e.to_string()))?;
        Ok(())
    }
}
