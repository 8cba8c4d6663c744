//! Persistence-sink plugin: one `VerdictStore::insert` per `DetectorInfo`.
//! Failures are logged and the event is dropped; a sink failure must never
//! stall the detector topic.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::bus::EventBus;
use crate::plugin::{Plugin, PluginKind};

use super::{VerdictRecord, VerdictStore};

pub const PLUGIN_NAME: &str = "verdict-sink";

pub struct PersistenceSink {
    store: Arc<dyn VerdictStore>,
}

impl PersistenceSink {
    pub fn new(store: Arc<dyn VerdictStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Plugin for PersistenceSink {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Handler
    }

    async fn start(&self, ctx: CancellationToken, _settings: Value, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let mut rx = bus.subscribe_detector();

        loop {
            let event = tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                event = rx.recv() => event,
            };
            let Some(event) = event else { return Ok(()) };

            let record = VerdictRecord::from(&event.0);
            let host = record.host.clone();
            if let Err(err) = self.store.insert(record).await {
                error!(host = %host, error = %err, "verdict sink: insert failed, dropping this verdict");
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
    use crate::persistence::fake::FakeVerdictStore;
    use std::time::Duration;

    fn detector_info() -> crate::models::DetectorInfo {
        let discovery = crate::models::DiscoveryInfo::new("cron-complete", "api", "ns-alice", "api.example.com");
        crate::models::DetectorInfo::legal_from_empty(&crate::models::CollectorInfo::empty(&discovery, "browser-collector", "podCount is 0"), "safety-detector", "us")
    }

    #[tokio::test]
    async fn inserts_one_record_per_detector_event() {
        let store = Arc::new(FakeVerdictStore::new());
        let plugin = PersistenceSink::new(store.clone());
        let bus = EventBus::new();

        let ctx = CancellationToken::new();
        let run_ctx = ctx.clone();
        let bus_for_plugin = bus.clone();
        let handle = tokio::spawn(async move { plugin.start(run_ctx, serde_json::json!({}), bus_for_plugin).await });

        bus.publish_detector(detector_info());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.recorded().len(), 1);

        ctx.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn a_failed_insert_is_logged_and_does_not_stop_the_plugin() {
        let store = Arc::new(FakeVerdictStore::new());
        store.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let plugin = PersistenceSink::new(store.clone());
        let bus = EventBus::new();

        let ctx = CancellationToken::new();
        let run_ctx = ctx.clone();
        let bus_for_plugin = bus.clone();
        let handle = tokio::spawn(async move { plugin.start(run_ctx, serde_json::json!({}), bus_for_plugin).await });

        bus.publish_detector(detector_info());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.recorded().is_empty());
        assert!(!handle.is_finished());

        ctx.cancel();
        let _ = handle.await;
    }
}
