//! Custom detector: same reviewer-classification contract as
//! [`super::safety`], plus a periodically-refreshed keyword-rule list
//! handed to the reviewer for context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::plugin::{Plugin, PluginKind};

use super::safety::classify;
use super::{CustomKeywordRule, ReviewerClient};

pub const PLUGIN_NAME: &str = "custom-detector";

/// The external relational table of keyword rules the custom detector
/// refreshes on a ticker and on startup.
#[async_trait]
pub trait KeywordRuleStore: Send + Sync {
    async fn list_rules(&self) -> anyhow::Result<Vec<CustomKeywordRule>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomDetectorSettings {
    pub max_workers: usize,
    #[serde(default)]
    pub region: String,
    pub ticker_minute: u64,
}

pub struct CustomDetector {
    reviewer: Arc<dyn ReviewerClient>,
    rule_store: Arc<dyn KeywordRuleStore>,
    rules: Arc<RwLock<Vec<CustomKeywordRule>>>,
}

impl CustomDetector {
    pub fn new(reviewer: Arc<dyn ReviewerClient>, rule_store: Arc<dyn KeywordRuleStore>) -> Self {
        Self { reviewer, rule_store, rules: Arc::new(RwLock::new(Vec::new())) }
    }

    async fn refresh_rules(&self) {
        match self.rule_store.list_rules().await {
            Ok(rules) => {
                let count = rules.len();
                *self.rules.write().await = rules;
                info!(count, "custom detector: keyword rules refreshed");
            }
            Err(err) => {
                warn!(error = %err, "custom detector: keyword rule refresh failed, keeping the previous rule set");
            }
        }
    }

    #[cfg(test)]
    pub async fn current_rules(&self) -> Vec<CustomKeywordRule> {
        self.rules.read().await.clone()
    }
}

#[async_trait]
impl Plugin for CustomDetector {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Detector
    }

    async fn start(&self, ctx: CancellationToken, settings: Value, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let settings: CustomDetectorSettings = serde_json::from_value(settings)?;
        self.refresh_rules().await;

        let semaphore = Arc::new(Semaphore::new(settings.max_workers.max(1)));
        let mut rx = bus.subscribe_collector();
        let mut ticker = tokio::time::interval(Duration::from_secs(settings.ticker_minute.max(1) * 60));
        ticker.tick().await; // first tick fires immediately; already refreshed above.

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    self.refresh_rules().await;
                }
                event = rx.recv() => {
                    let Some(event) = event else { return Ok(()) };

                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return Ok(()),
                    };

                    let reviewer = self.reviewer.clone();
                    let bus = bus.clone();
                    let region = settings.region.clone();
                    let rules = self.rules.read().await.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let collected = event.0;

                        let result = AssertUnwindSafe(classify(reviewer.as_ref(), &collected, PLUGIN_NAME, &region, rules)).catch_unwind().await;
                        match result {
                            Ok(info) => bus.publish_detector(info),
                            Err(panic) => error!(host = %collected.host, ?panic, "custom detector: task panicked"),
                        }
                    });
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
    use crate::detector::fake::{FakeKeywordRuleStore, FakeReviewerClient};
    use crate::detector::ReviewVerdict;
    use crate::models::{CollectorInfo, DiscoveryInfo};
    use std::time::Duration as StdDuration;

    fn collector_info() -> CollectorInfo {
        let mut discovery = DiscoveryInfo::new("cron-complete", "api", "ns-alice", "api.example.com");
        discovery.pod_count = 1;
        CollectorInfo::populated(&discovery, "browser-collector", discovery.url(), "<html>content</html>".to_string(), vec![1, 2, 3])
    }

    #[tokio::test]
    async fn startup_refresh_populates_rules_before_any_collector_event() {
        let reviewer = Arc::new(FakeReviewerClient::new(ReviewVerdict::default()));
        let store = Arc::new(FakeKeywordRuleStore::new(vec![CustomKeywordRule::from_row("gambling", "poker,casino", "gambling terms")]));
        let detector = CustomDetector::new(reviewer, store);

        detector.refresh_rules().await;
        assert_eq!(detector.current_rules().await.len(), 1);
    }

    #[tokio::test]
    async fn a_failed_refresh_keeps_the_previous_rule_set() {
        let reviewer = Arc::new(FakeReviewerClient::new(ReviewVerdict::default()));
        let store = Arc::new(FakeKeywordRuleStore::new(vec![CustomKeywordRule::from_row("gambling", "poker", "gambling terms")]));
        let detector = CustomDetector::new(reviewer, store.clone());

        detector.refresh_rules().await;
        store.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        detector.refresh_rules().await;

        assert_eq!(detector.current_rules().await.len(), 1);
    }

    #[tokio::test]
    async fn plugin_start_refreshes_rules_on_startup_and_classifies_events() {
        let reviewer = Arc::new(FakeReviewerClient::new(ReviewVerdict::default()));
        let store = Arc::new(FakeKeywordRuleStore::new(vec![CustomKeywordRule::from_row("gambling", "poker", "gambling terms")]));
        let detector = CustomDetector::new(reviewer, store);
        let bus = EventBus::new();
        let mut detector_rx = bus.subscribe_detector();

        let ctx = CancellationToken::new();
        let settings = serde_json::json!({"max_workers": 2, "region": "us", "ticker_minute": 60});
        let run_ctx = ctx.clone();
        let bus_for_plugin = bus.clone();
        let handle = tokio::spawn(async move { detector.start(run_ctx, settings, bus_for_plugin).await });

        bus.publish_collector(collector_info());
        let event = tokio::time::timeout(StdDuration::from_secs(1), detector_rx.recv()).await.expect("within timeout").expect("open channel");
        assert!(!event.0.is_illegal);

        ctx.cancel();
        let _ = handle.await;
    }
}
