//! Informer-deployment discovery: polls Deployments cluster-wide, applies
//! the age filter and image-multiset change detection, and for each
//! emitting workload fetches same-namespace ingresses carrying the
//! `cloud.sealos.io/app-deploy-manager` label and emits one `DiscoveryInfo`
//! per ingress path.

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
use crate::k8s::ClusterApi;
use crate::plugin::{Plugin, PluginKind};

use super::{diff_workloads, discovery_from_ingress, probe_pod_readiness};

pub const PLUGIN_NAME: &str = "informer-deployment";

#[derive(Debug, Clone, Deserialize)]
pub struct InformerDeploymentSettings {
    pub age_threshold_second: u64,
    #[serde(default = "default_resync_interval_second")]
    pub resync_interval_second: u64,
}

fn default_resync_interval_second() -> u64 {
    30
}

pub struct InformerDeployment {
    api: Arc<dyn ClusterApi>,
    previous: Mutex<BTreeMap<String, Vec<String>>>,
}

impl InformerDeployment {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api, previous: Mutex::new(BTreeMap::new()) }
    }

    async fn run_once(&self, bus: &EventBus, age_threshold: chrono::Duration) {
        let workloads = match self.api.list_deployments_all_namespaces().await {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "informer-deployment: failed to list deployments, skipping this round");
                return;
            }
        };

        let changed = {
            let mut previous = self.previous.lock().await;
            diff_workloads(workloads, &mut previous, age_threshold)
        };

        for workload in &changed {
            let app_label = match workload.labels.get(crate::k8s::APP_DEPLOY_MANAGER_LABEL) {
                Some(v) => v.clone(),
                None => continue,
            };

            let ingresses = match self.api.list_ingresses_by_app_label(&workload.namespace, &app_label).await {
                Ok(list) => list,
                Err(err) => {
                    warn!(workload = %workload.name, error = %err, "informer-deployment: failed to list ingresses for workload");
                    continue;
                }
            };

            let selector = BTreeMap::from([("app".to_string(), app_label.clone())]);
            let (pod_count, has_active_pods) = probe_pod_readiness(self.api.as_ref(), &workload.namespace, &selector).await;

            for ingress in &ingresses {
                for path in &ingress.paths {
                    let info = discovery_from_ingress(PLUGIN_NAME, ingress, &ingress.host, path, pod_count, has_active_pods);
                    bus.publish_discovery(info);
                }
            }
        }
    }
}

#[async_trait]
impl Plugin for InformerDeployment {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Discovery
    }

    async fn start(&self, ctx: CancellationToken, settings: Value, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let settings: InformerDeploymentSettings = serde_json::from_value(settings)?;
        let age_threshold = chrono::Duration::seconds(settings.age_threshold_second as i64);
        let mut ticker = tokio::time::interval(StdDuration::from_secs(settings.resync_interval_second.max(1)));

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    self.run_once(&bus, age_threshold).await;
                }
            }
        }
    }

    async fn stop(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}
