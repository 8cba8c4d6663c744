//! Safety detector: every `CollectorInfo` becomes exactly one `DetectorInfo`
//! — a reviewer call for populated artifacts, an immediate `isIllegal=false`
//! verdict for empty ones.

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

use crate::bus::EventBus;
use crate::models::{CollectorInfo, DetectorInfo};
use crate::plugin::{Plugin, PluginKind};

use super::{truncate_html, CustomKeywordRule, ReviewRequest, ReviewerClient};

pub const PLUGIN_NAME: &str = "safety-detector";

/// Reviewer calls get their own fixed deadline independent of `maxWorkers`.
const REVIEW_TIMEOUT: Duration = Duration::from_secs(80);

#[derive(Debug, Clone, Deserialize)]
pub struct SafetyDetectorSettings {
    pub max_workers: usize,
    #[serde(default)]
    pub region: String,
}

pub struct SafetyDetector {
    reviewer: Arc<dyn ReviewerClient>,
}

impl SafetyDetector {
    pub fn new(reviewer: Arc<dyn ReviewerClient>) -> Self {
        Self { reviewer }
    }
}

pub(super) async fn classify(reviewer: &dyn ReviewerClient, collected: &CollectorInfo, detector_name: &str, region: &str, keyword_rules: Vec<CustomKeywordRule>) -> DetectorInfo {
    if collected.is_empty {
        return DetectorInfo::legal_from_empty(collected, detector_name, region);
    }

    let request = ReviewRequest { html_prefix: truncate_html(&collected.html), screenshot: collected.screenshot.clone(), keyword_rules };

    match tokio::time::timeout(REVIEW_TIMEOUT, reviewer.review(request)).await {
        Ok(Ok(verdict)) => DetectorInfo {
            discovery_name: collected.discovery_name.clone(),
            name: collected.name.clone(),
            namespace: collected.namespace.clone(),
            host: collected.host.clone(),
            path: collected.path.clone(),
            service_name: collected.service_name.clone(),
            has_active_pods: collected.has_active_pods,
            pod_count: collected.pod_count,
            detector_name: detector_name.to_string(),
            is_illegal: verdict.is_illegal,
            description: verdict.description,
            keywords: verdict.keywords,
            region: region.to_string(),
            url: collected.url.clone(),
        },
        Ok(Err(err)) => {
            warn!(host = %collected.host, error = %err, "safety detector: reviewer call failed");
            reviewer_failure_verdict(collected, detector_name, region, err.to_string())
        }
        Err(_) => {
            warn!(host = %collected.host, "safety detector: reviewer call timed out");
            reviewer_failure_verdict(collected, detector_name, region, "reviewer call timed out".to_string())
        }
    }
}

fn reviewer_failure_verdict(collected: &CollectorInfo, detector_name: &str, region: &str, description: String) -> DetectorInfo {
    DetectorInfo {
        discovery_name: collected.discovery_name.clone(),
        name: collected.name.clone(),
        namespace: collected.namespace.clone(),
        host: collected.host.clone(),
        path: collected.path.clone(),
        service_name: collected.service_name.clone(),
        has_active_pods: collected.has_active_pods,
        pod_count: collected.pod_count,
        detector_name: detector_name.to_string(),
        is_illegal: false,
        description,
        keywords: Vec::new(),
        region: region.to_string(),
        url: collected.url.clone(),
    }
}

#[async_trait]
impl Plugin for SafetyDetector {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Detector
    }

    async fn start(&self, ctx: CancellationToken, settings: Value, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let settings: SafetyDetectorSettings = serde_json::from_value(settings)?;
        let semaphore = Arc::new(Semaphore::new(settings.max_workers.max(1)));
        let mut rx = bus.subscribe_collector();

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

            let reviewer = self.reviewer.clone();
            let bus = bus.clone();
            let region = settings.region.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let collected = event.0;

                let result = AssertUnwindSafe(classify(reviewer.as_ref(), &collected, PLUGIN_NAME, &region, Vec::new())).catch_unwind().await;
                match result {
                    Ok(info) => bus.publish_detector(info),
                    Err(panic) => error!(host = %collected.host, ?panic, "safety detector: task panicked"),
                }
            });
        }
    }

    async fn stop(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::fake::FakeReviewerClient;
    use crate::detector::ReviewVerdict;
    use crate::models::DiscoveryInfo;
    use std::time::Duration as StdDuration;

    fn collector_info(is_empty: bool) -> CollectorInfo {
        let mut discovery = DiscoveryInfo::new("cron-complete", "api", "ns-alice", "api.example.com");
        discovery.pod_count = 1;
        if is_empty {
            CollectorInfo::empty(&discovery, "browser-collector", "podCount is 0")
        } else {
            CollectorInfo::populated(&discovery, "browser-collector", discovery.url(), "<html>content</html>".to_string(), vec![1, 2, 3])
        }
    }

    #[tokio::test]
    async fn empty_collector_info_skips_the_reviewer() {
        let reviewer = Arc::new(FakeReviewerClient::new(ReviewVerdict::default()));
        let verdict = classify(reviewer.as_ref(), &collector_info(true), PLUGIN_NAME, "us", Vec::new()).await;
        assert!(!verdict.is_illegal);
        assert_eq!(reviewer.call_count(), 0);
    }

    #[tokio::test]
    async fn populated_collector_info_calls_the_reviewer_and_propagates_the_verdict() {
        let reviewer = Arc::new(FakeReviewerClient::new(ReviewVerdict { is_illegal: true, description: "flagged".to_string(), keywords: vec!["bad".to_string()] }));
        let verdict = classify(reviewer.as_ref(), &collector_info(false), PLUGIN_NAME, "us", Vec::new()).await;
        assert!(verdict.is_illegal);
        assert_eq!(verdict.description, "flagged");
        assert_eq!(reviewer.call_count(), 1);
    }

    #[tokio::test]
    async fn reviewer_failure_yields_a_legal_verdict_with_a_diagnostic() {
        let reviewer = Arc::new(FakeReviewerClient::new(ReviewVerdict::default()));
        reviewer.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let verdict = classify(reviewer.as_ref(), &collector_info(false), PLUGIN_NAME, "us", Vec::new()).await;
        assert!(!verdict.is_illegal);
        assert!(verdict.keywords.is_empty());
        assert!(!verdict.description.is_empty());
    }

    #[tokio::test]
    async fn plugin_start_publishes_one_detector_event_per_collector_event() {
        let reviewer = Arc::new(FakeReviewerClient::new(ReviewVerdict::default()));
        let plugin = SafetyDetector::new(reviewer);
        let bus = EventBus::new();
        let mut detector_rx = bus.subscribe_detector();

        let ctx = CancellationToken::new();
        let settings = serde_json::json!({"max_workers": 2, "region": "us"});
        let run_ctx = ctx.clone();
        let bus_for_plugin = bus.clone();
        let handle = tokio::spawn(async move { plugin.start(run_ctx, settings, bus_for_plugin).await });

        bus.publish_collector(collector_info(true));
        let event = tokio::time::timeout(StdDuration::from_secs(1), detector_rx.recv()).await.expect("within timeout").expect("open channel");
        assert!(!event.0.is_illegal);

        ctx.cancel();
        let _ = handle.await;
    }
}
