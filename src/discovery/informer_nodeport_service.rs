//! Informer-nodeport-service discovery: polls Services cluster-wide,
//! filters to `NodePort` services in tenant namespaces, diffs the set of
//! node ports per service, and for each new/changed port resolves a
//! reachable node IP and emits a `DiscoveryInfo` with `host = "<ip>:<port>"`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bus::EventBus;
use crate::k8s::{ClusterApi, ServiceKind};
use crate::models::DiscoveryInfo;
use crate::plugin::{Plugin, PluginKind};

use super::{is_tenant_namespace, probe_pod_readiness};

pub const PLUGIN_NAME: &str = "informer-nodeport-service";

#[derive(Debug, Clone, Deserialize)]
pub struct InformerNodePortServiceSettings {
    #[serde(default = "default_resync_interval_second")]
    pub resync_interval_second: u64,
}

fn default_resync_interval_second() -> u64 {
    30
}

pub struct InformerNodePortService {
    api: Arc<dyn ClusterApi>,
    previous: Mutex<BTreeMap<String, Vec<i32>>>,
}

impl InformerNodePortService {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api, previous: Mutex::new(BTreeMap::new()) }
    }

    async fn run_once(&self, bus: &EventBus) {
        let services = match self.api.list_services_all_namespaces().await {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "informer-nodeport-service: failed to list services, skipping this round");
                return;
            }
        };

        let node_ip = match self.api.list_nodes().await {
            Ok(nodes) => nodes.iter().find_map(|n| n.usable_ip().map(|s| s.to_string())),
            Err(err) => {
                warn!(error = %err, "informer-nodeport-service: failed to list nodes, skipping this round");
                return;
            }
        };
        let Some(node_ip) = node_ip else {
            warn!("informer-nodeport-service: no node with a usable IP, skipping this round");
            return;
        };

        let tenant_services: Vec<_> = services
            .into_iter()
            .filter(|s| is_tenant_namespace(&s.namespace) && s.kind == ServiceKind::NodePort)
            .collect();

        let mut seen_keys = std::collections::BTreeSet::new();
        let mut previous = self.previous.lock().await;

        for service in &tenant_services {
            let key = format!("{}/{}", service.namespace, service.name);
            seen_keys.insert(key.clone());

            let mut ports: Vec<i32> = service.node_ports.iter().map(|(_, np)| *np).collect();
            ports.sort_unstable();

            let changed_ports: Vec<i32> = match previous.get(&key) {
                None => ports.clone(),
                Some(existing) if existing != &ports => ports.iter().filter(|p| !existing.contains(p)).copied().collect(),
                Some(_) => Vec::new(),
            };
            previous.insert(key, ports);

            if changed_ports.is_empty() {
                continue;
            }

            let selector = BTreeMap::from([("app".to_string(), service.name.clone())]);
            let (pod_count, has_active_pods) = probe_pod_readiness(self.api.as_ref(), &service.namespace, &selector).await;

            for port in changed_ports {
                let info = DiscoveryInfo {
                    discovery_name: PLUGIN_NAME.to_string(),
                    name: service.name.clone(),
                    namespace: service.namespace.clone(),
                    host: format!("{node_ip}:{port}"),
                    path: vec!["/".to_string()],
                    service_name: service.name.clone(),
                    has_active_pods,
                    pod_count,
                };
                bus.publish_discovery(info);
            }
        }

        previous.retain(|key, _| seen_keys.contains(key));
    }
}

#[async_trait]
impl Plugin for InformerNodePortService {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Discovery
    }

    async fn start(&self, ctx: CancellationToken, settings: Value, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let settings: InformerNodePortServiceSettings = serde_json::from_value(settings)?;
        let mut ticker = tokio::time::interval(StdDuration::from_secs(settings.resync_interval_second.max(1)));

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
    use crate::k8s::{NodeAddress, ServiceInfo};

    fn nodeport_service(name: &str, namespace: &str, ports: &[(i32, i32)]) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind: ServiceKind::NodePort,
            labels: BTreeMap::new(),
            node_ports: ports.to_vec(),
        }
    }

    #[tokio::test]
    async fn emits_one_event_per_node_port_on_first_sight() {
        let mut fake = FakeClusterApi::new();
        fake.services = vec![nodeport_service("web", "ns-alice", &[(80, 31000), (443, 31001)])];
        fake.node_addresses.insert("node-1".to_string(), NodeAddress { external_ip: Some("1.2.3.4".to_string()), internal_ip: None });

        let api: Arc<dyn ClusterApi> = Arc::new(fake);
        let plugin = InformerNodePortService::new(api);
        let bus = EventBus::new();
        let mut rx = bus.subscribe_discovery();

        plugin.run_once(&bus).await;

        let mut hosts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            hosts.push(event.0.host);
        }
        assert_eq!(hosts.len(), 2);
        assert!(hosts.contains(&"1.2.3.4:31000".to_string()));
        assert!(hosts.contains(&"1.2.3.4:31001".to_string()));
    }

    #[tokio::test]
    async fn cluster_ip_services_are_ignored() {
        let mut fake = FakeClusterApi::new();
        fake.services = vec![ServiceInfo {
            name: "internal".to_string(),
            namespace: "ns-alice".to_string(),
            kind: ServiceKind::ClusterIp,
            labels: BTreeMap::new(),
            node_ports: vec![],
        }];
        fake.node_addresses.insert("node-1".to_string(), NodeAddress { external_ip: Some("1.2.3.4".to_string()), internal_ip: None });

        let api: Arc<dyn ClusterApi> = Arc::new(fake);
        let plugin = InformerNodePortService::new(api);
        let bus = EventBus::new();
        let mut rx = bus.subscribe_discovery();

        plugin.run_once(&bus).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unchanged_port_set_produces_no_second_event() {
        let mut fake = FakeClusterApi::new();
        fake.services = vec![nodeport_service("web", "ns-alice", &[(80, 31000)])];
        fake.node_addresses.insert("node-1".to_string(), NodeAddress { external_ip: Some("1.2.3.4".to_string()), internal_ip: None });

        let api: Arc<dyn ClusterApi> = Arc::new(fake);
        let plugin = InformerNodePortService::new(api);
        let bus = EventBus::new();

        plugin.run_once(&bus).await;
        let mut rx = bus.subscribe_discovery();
        plugin.run_once(&bus).await;
        assert!(rx.try_recv().is_err());
    }
}
