//! The four discovery plugin variants, sharing one contract: watch/resync
//! cluster resources, filter to tenant namespaces, and emit `DiscoveryInfo`
//! onto the `discovery` topic.
//!
//! The underlying [`crate::k8s::ClusterApi`] surface is poll-based
//! (`list_*`), so every "informer" variant here is a periodic full-list
//! diff against the previous snapshot rather than a genuine watch stream —
//! see DESIGN.md for why that substitution preserves the spec's add/update
//! change-detection semantics without requiring a streaming capability on
//! the trait.

pub mod cron_complete;
pub mod informer_deployment;
pub mod informer_nodeport_service;
pub mod informer_statefulset;

use std::collections::BTreeMap;

use crate::k8s::{ClusterApi, IngressInfo};
use crate::models::DiscoveryInfo;

pub const TENANT_PREFIX: &str = "ns-";

pub fn is_tenant_namespace(namespace: &str) -> bool {
    namespace.starts_with(TENANT_PREFIX)
}

/// Deduplicates ingresses by `(host, path)`, keeping the one with the later
/// creation timestamp when two cover the same pair (testable property #10 /
/// scenario C).
pub fn dedup_ingresses_by_host_path(ingresses: Vec<IngressInfo>) -> Vec<(String, String, IngressInfo)> {
    let mut winners: BTreeMap<(String, String), IngressInfo> = BTreeMap::new();

    for ingress in ingresses {
        for path in &ingress.paths {
            let key = (ingress.host.clone(), path.clone());
            match winners.get(&key) {
                Some(existing) if existing.creation_timestamp >= ingress.creation_timestamp => {}
                _ => {
                    winners.insert(key, ingress.clone());
                }
            }
        }
    }

    winners.into_iter().map(|((host, path), ingress)| (host, path, ingress)).collect()
}

/// Best-effort pod-readiness probe for a workload's label selector,
/// producing `podCount`/`hasActivePods` per spec 4.3's shared rule.
pub async fn probe_pod_readiness(api: &dyn ClusterApi, namespace: &str, selector: &BTreeMap<String, String>) -> (u32, bool) {
    match api.list_pods_by_selector(namespace, selector).await {
        Ok(readiness) => (readiness.pod_count, readiness.ready_count > 0),
        Err(err) => {
            tracing::warn!(namespace = %namespace, error = %err, "pod readiness probe failed, assuming no active pods");
            (0, false)
        }
    }
}

pub fn discovery_from_ingress(discovery_name: &str, ingress: &IngressInfo, host: &str, path: &str, pod_count: u32, has_active_pods: bool) -> DiscoveryInfo {
    DiscoveryInfo {
        discovery_name: discovery_name.to_string(),
        name: ingress.name.clone(),
        namespace: ingress.namespace.clone(),
        host: host.to_string(),
        path: vec![path.to_string()],
        service_name: ingress.service_name.clone(),
        has_active_pods,
        pod_count,
    }
}

/// Shared add/update diffing for the two workload-informer variants.
///
/// Models the spec's "subscribe to add/update events" contract as a
/// full-list poll against a retained snapshot: a workload not seen before
/// is an add (subject to the age filter); a previously-seen workload whose
/// container-image multiset changed is an update (never age-filtered,
/// since an update event is inherently about something that already
/// passed the add gate).
pub fn diff_workloads(
    current: Vec<crate::k8s::WorkloadInfo>,
    previous: &mut BTreeMap<String, Vec<String>>,
    age_threshold: chrono::Duration,
) -> Vec<crate::k8s::WorkloadInfo> {
    let now = chrono::Utc::now();
    let mut changed = Vec::new();
    let mut seen_keys = std::collections::BTreeSet::new();

    for workload in current {
        let key = format!("{}/{}", workload.namespace, workload.name);
        seen_keys.insert(key.clone());

        let mut sorted_images = workload.container_images.clone();
        sorted_images.sort();

        match previous.get(&key) {
            None => {
                let age = now.signed_duration_since(workload.creation_timestamp);
                if age <= age_threshold {
                    changed.push(workload.clone());
                }
                previous.insert(key, sorted_images);
            }
            Some(existing_images) => {
                if existing_images != &sorted_images {
                    changed.push(workload.clone());
                    previous.insert(key, sorted_images);
                }
            }
        }
    }

    previous.retain(|key, _| seen_keys.contains(key));
    changed
}
