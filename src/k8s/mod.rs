//! The Kubernetes capability surface the core depends on.
//!
//! Per spec section 1, the concrete Kubernetes API client is out of scope —
//! only the capability surface matters. `ClusterApi` is that surface: list
//! ingresses/endpoint-slices/deployments/statefulsets/services cluster-wide
//! or per-namespace, list pods by selector, and add labels to a namespace.
//! `kube_api::KubeClusterApi` is the thin `kube`-backed adapter; `fake` is
//! an in-memory double used throughout the discovery-plugin tests.

pub mod fake;
pub mod kube_api;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A single ingress rule's host + paths, plus enough provenance to dedup
/// and to resolve the owning app-deploy-manager label.
#[derive(Debug, Clone, PartialEq)]
pub struct IngressInfo {
    pub name: String,
    pub namespace: String,
    pub host: String,
    pub paths: Vec<String>,
    pub service_name: String,
    pub labels: BTreeMap<String, String>,
    pub creation_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSliceInfo {
    pub name: String,
    pub namespace: String,
    pub service_name: String,
    pub ready_endpoint_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadInfo {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub container_images: Vec<String>,
    pub creation_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    ClusterIp,
    NodePort,
    LoadBalancer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    pub namespace: String,
    pub kind: ServiceKind,
    pub labels: BTreeMap<String, String>,
    /// `(port, node_port)` pairs; only populated for `NodePort`/`LoadBalancer`.
    pub node_ports: Vec<(i32, i32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeAddress {
    pub external_ip: Option<String>,
    pub internal_ip: Option<String>,
}

impl NodeAddress {
    /// External first, else internal — per spec 4.3's NodePort resolution rule.
    pub fn usable_ip(&self) -> Option<&str> {
        self.external_ip.as_deref().or(self.internal_ip.as_deref())
    }
}

/// Readiness probe result for a workload's selector: how many pods exist
/// and how many are ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodReadiness {
    pub pod_count: u32,
    pub ready_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterApiError {
    #[error("kubernetes api call failed: {0}")]
    ApiError(String),
    #[error("resource not found: {0}")]
    NotFound(String),
}

pub type ClusterResult<T> = Result<T, ClusterApiError>;

/// The capability surface consumed by discovery plugins and the scanner's
/// labeling step. A `kube`-backed implementation and an in-memory fake both
/// implement this.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_ingresses_all_namespaces(&self) -> ClusterResult<Vec<IngressInfo>>;
    async fn list_ingresses(&self, namespace: &str) -> ClusterResult<Vec<IngressInfo>>;
    async fn list_ingresses_by_app_label(&self, namespace: &str, app_label_value: &str) -> ClusterResult<Vec<IngressInfo>>;

    async fn list_endpoint_slices_all_namespaces(&self) -> ClusterResult<Vec<EndpointSliceInfo>>;

    async fn list_deployments_all_namespaces(&self) -> ClusterResult<Vec<WorkloadInfo>>;
    async fn list_statefulsets_all_namespaces(&self) -> ClusterResult<Vec<WorkloadInfo>>;

    async fn list_services_all_namespaces(&self) -> ClusterResult<Vec<ServiceInfo>>;

    async fn list_pods_by_selector(&self, namespace: &str, selector: &BTreeMap<String, String>) -> ClusterResult<PodReadiness>;

    async fn node_address(&self, node_name: &str) -> ClusterResult<NodeAddress>;

    /// All cluster nodes' addresses, used by the NodePort-service informer
    /// to resolve a reachable `host:port` without caring which node answers.
    async fn list_nodes(&self) -> ClusterResult<Vec<NodeAddress>>;

    /// Adds/overwrites labels on a namespace. The only mutation the system
    /// performs, per spec section 1's non-goals.
    async fn label_namespace(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<()>;
}

/// The app-deploy-manager label name workloads and their ingresses share,
/// used to correlate an emitting Deployment/StatefulSet to its ingresses.
pub const APP_DEPLOY_MANAGER_LABEL: &str = "cloud.sealos.io/app-deploy-manager";
