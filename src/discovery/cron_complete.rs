//! Cron-complete discovery: every `intervalMinute` (and optionally once at
//! startup after `startTimeSecond`), lists all ingresses and endpoint
//! slices cluster-wide, dedups by `(host, path)`, filters to `ns-*`
//! namespaces, and emits one `DiscoveryInfo` per (ingress, rule, path).
//!
//! Unlike the workload informers, cron-complete never sees a real pod
//! label selector (only an ingress and its `service_name`) so it derives
//! `podCount`/`hasActivePods` from the endpoint slices backing that
//! service instead of guessing a selector.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::k8s::{ClusterApi, EndpointSliceInfo};
use crate::plugin::{Plugin, PluginKind};

use super::{dedup_ingresses_by_host_path, discovery_from_ingress, is_tenant_namespace};

/// Sums `ready_endpoint_count` across every slice backing `(namespace,
/// service_name)` — a service can be split across more than one slice.
fn readiness_from_endpoint_slices(slices: &[EndpointSliceInfo], namespace: &str, service_name: &str) -> (u32, bool) {
    let pod_count: u32 = slices
        .iter()
        .filter(|s| s.namespace == namespace && s.service_name == service_name)
        .map(|s| s.ready_endpoint_count)
        .sum();
    (pod_count, pod_count > 0)
}

pub const PLUGIN_NAME: &str = "cron-complete";

#[derive(Debug, Clone, Deserialize)]
pub struct CronCompleteSettings {
    pub interval_minute: u64,
    #[serde(default)]
    pub start_time_second: Option<u64>,
}

pub struct CronCompleteDiscovery {
    api: Arc<dyn ClusterApi>,
}

impl CronCompleteDiscovery {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    async fn run_once(&self, bus: &EventBus) {
        let ingresses = match self.api.list_ingresses_all_namespaces().await {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "cron-complete: failed to list ingresses, skipping this round");
                return;
            }
        };

        let endpoint_slices = match self.api.list_endpoint_slices_all_namespaces().await {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "cron-complete: failed to list endpoint slices, skipping this round");
                return;
            }
        };

        let tenant_ingresses: Vec<_> = ingresses.into_iter().filter(|i| is_tenant_namespace(&i.namespace)).collect();
        let deduped = dedup_ingresses_by_host_path(tenant_ingresses);

        let mut emitted = 0usize;
        for (host, path, ingress) in &deduped {
            let (pod_count, has_active_pods) = readiness_from_endpoint_slices(&endpoint_slices, &ingress.namespace, &ingress.service_name);

            let info = discovery_from_ingress(PLUGIN_NAME, ingress, host, path, pod_count, has_active_pods);
            bus.publish_discovery(info);
            emitted += 1;
        }

        info!(emitted, "cron-complete: discovery round complete");
    }
}

#[async_trait]
impl Plugin for CronCompleteDiscovery {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Discovery
    }

    async fn start(&self, ctx: CancellationToken, settings: Value, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let settings: CronCompleteSettings = serde_json::from_value(settings)?;
        let interval = Duration::from_secs(settings.interval_minute.max(1) * 60);

        if let Some(start_delay) = settings.start_time_second {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(start_delay)) => {}
                _ = ctx.cancelled() => return Ok(()),
            }
            self.run_once(&bus).await;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; consume it.

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    self.run_once(&bus).await;
                }
            }
        }
    }

    async fn stop(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakeClusterApi;
    use crate::k8s::IngressInfo;
    use chrono::{Duration as ChronoDuration, Utc};

    fn ingress(name: &str, namespace: &str, host: &str, created_offset_secs: i64) -> IngressInfo {
        IngressInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            host: host.to_string(),
            paths: vec!["/x".to_string()],
            service_name: "svc".to_string(),
            labels: BTreeMap::new(),
            creation_timestamp: Utc::now() + ChronoDuration::seconds(created_offset_secs),
        }
    }

    fn endpoint_slice(namespace: &str, service_name: &str, ready_endpoint_count: u32) -> EndpointSliceInfo {
        EndpointSliceInfo { name: format!("{service_name}-abcde"), namespace: namespace.to_string(), service_name: service_name.to_string(), ready_endpoint_count }
    }

    #[tokio::test]
    async fn emits_exactly_one_event_per_deduped_host_path() {
        let mut fake = FakeClusterApi::new();
        fake.ingresses = vec![ingress("old", "ns-alice", "a.example", 0), ingress("new", "ns-alice", "a.example", 100)];
        fake.endpoint_slices = vec![endpoint_slice("ns-alice", "svc", 1)];

        let api: Arc<dyn ClusterApi> = Arc::new(fake);
        let plugin = CronCompleteDiscovery::new(api);
        let bus = EventBus::new();
        let mut rx = bus.subscribe_discovery();

        plugin.run_once(&bus).await;

        let event = rx.try_recv().expect("expected exactly one event");
        assert_eq!(event.0.name, "new");
        assert!(rx.try_recv().is_err(), "expected only a single event for the deduped pair");
    }

    #[tokio::test]
    async fn pod_count_and_readiness_come_from_matching_endpoint_slices() {
        let mut fake = FakeClusterApi::new();
        fake.ingresses = vec![ingress("api", "ns-alice", "a.example", 0)];
        fake.endpoint_slices = vec![endpoint_slice("ns-alice", "svc", 2), endpoint_slice("ns-alice", "svc", 1), endpoint_slice("ns-alice", "other-svc", 5)];

        let api: Arc<dyn ClusterApi> = Arc::new(fake);
        let plugin = CronCompleteDiscovery::new(api);
        let bus = EventBus::new();
        let mut rx = bus.subscribe_discovery();

        plugin.run_once(&bus).await;

        let event = rx.try_recv().expect("expected exactly one event");
        assert_eq!(event.0.pod_count, 3, "should sum ready_endpoint_count across both slices backing svc, ignoring other-svc");
        assert!(event.0.has_active_pods);
    }

    #[tokio::test]
    async fn no_matching_endpoint_slice_means_no_active_pods() {
        let mut fake = FakeClusterApi::new();
        fake.ingresses = vec![ingress("api", "ns-alice", "a.example", 0)];

        let api: Arc<dyn ClusterApi> = Arc::new(fake);
        let plugin = CronCompleteDiscovery::new(api);
        let bus = EventBus::new();
        let mut rx = bus.subscribe_discovery();

        plugin.run_once(&bus).await;

        let event = rx.try_recv().expect("expected exactly one event");
        assert_eq!(event.0.pod_count, 0);
        assert!(!event.0.has_active_pods);
    }

    #[tokio::test]
    async fn skips_non_tenant_namespaces() {
        let mut fake = FakeClusterApi::new();
        fake.ingresses = vec![ingress("sys", "kube-system", "sys.example", 0)];
        let api: Arc<dyn ClusterApi> = Arc::new(fake);
        let plugin = CronCompleteDiscovery::new(api);
        let bus = EventBus::new();
        let mut rx = bus.subscribe_discovery();

        plugin.run_once(&bus).await;
        assert!(rx.try_recv().is_err());
    }
}
