//! Collector plugin: wraps [`super::collect_one`] with a `maxWorkers`
//! semaphore and subscribes to the discovery topic, publishing one
//! `CollectorInfo` per discovery (or silently dropping a hard failure).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::browser::BrowserPool;
use crate::bus::EventBus;
use crate::plugin::{Plugin, PluginKind};

use super::collect_one;

pub const PLUGIN_NAME: &str = "browser-collector";

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorSettings {
    pub max_workers: usize,
    pub collector_timeout_second: u64,
}

pub struct CollectorPlugin {
    pool: Arc<BrowserPool>,
}

impl CollectorPlugin {
    pub fn new(pool: Arc<BrowserPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Plugin for CollectorPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Collector
    }

    async fn start(&self, ctx: CancellationToken, settings: Value, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let settings: CollectorSettings = serde_json::from_value(settings)?;
        let semaphore = Arc::new(Semaphore::new(settings.max_workers.max(1)));
        let mut rx = bus.subscribe_discovery();

        loop {
            let event = tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                event = rx.recv() => event,
            };
            let Some(event) = event else { return Ok(()) };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };

            let pool = self.pool.clone();
            let bus = bus.clone();
            let timeout_second = settings.collector_timeout_second;

            tokio::spawn(async move {
                let _permit = permit;
                let discovery = event.0;

                let result = AssertUnwindSafe(collect_one(&pool, &discovery, PLUGIN_NAME, timeout_second)).catch_unwind().await;

                match result {
                    Ok(Ok(info)) => bus.publish_collector(info),
                    Ok(Err(err)) if err.is_transient() => {
                        warn!(host = %discovery.host, error = %err, "collector: transient failure, emitting empty observation");
                        bus.publish_collector(crate::models::CollectorInfo::empty(&discovery, PLUGIN_NAME, err.to_string()));
                    }
                    Ok(Err(err)) => {
                        error!(host = %discovery.host, error = %err, "collector: hard failure, dropping");
                    }
                    Err(panic) => {
                        error!(host = %discovery.host, ?panic, "collector: task panicked");
                    }
                }
            });
        }
    }

    async fn stop(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowserLauncher;
    use crate::models::DiscoveryInfo;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn publishes_a_collector_event_for_each_discovery() {
        let launcher = Arc::new(FakeBrowserLauncher::new());
        let pool = BrowserPool::new(launcher, 2, StdDuration::from_secs(3600));
        let plugin = CollectorPlugin::new(pool);
        let bus = EventBus::new();
        let mut collector_rx = bus.subscribe_collector();

        let ctx = CancellationToken::new();
        let settings = serde_json::json!({"max_workers": 2, "collector_timeout_second": 5});
        let bus_for_plugin = bus.clone();
        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move { plugin.start(run_ctx, settings, bus_for_plugin).await });

        let mut discovery = DiscoveryInfo::new("cron-complete", "api", "ns-alice", "api.example.com");
        discovery.pod_count = 1;
        bus.publish_discovery(discovery);

        let event = tokio::time::timeout(StdDuration::from_secs(1), collector_rx.recv()).await.expect("should receive within timeout").expect("channel open");
        assert!(!event.0.is_empty);

        ctx.cancel();
        let _ = handle.await;
    }
}
