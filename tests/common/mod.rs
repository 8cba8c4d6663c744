use complik::browser::fake::{FakeBrowserLauncher, PageScript};
use complik::browser::BrowserPool;
use complik::detector::fake::FakeReviewerClient;
use complik::detector::ReviewVerdict;
use complik::models::DiscoveryInfo;
use std::sync::Arc;
use std::time::Duration;

pub fn illegal_page_pool() -> Arc<BrowserPool> {
    let launcher = Arc::new(FakeBrowserLauncher::new());
    *launcher.script.lock().expect("lock poisoned") = PageScript {
        document_status: Some(200),
        html: "<html><body>forbidden content</body></html>".to_string(),
        screenshot: vec![0xFF, 0xD8, 0xFF],
        navigate_error: None,
        load_error: None,
    };
    BrowserPool::new(launcher, 2, Duration::from_secs(60))
}

pub fn reviewer_flagging(description: &str) -> Arc<FakeReviewerClient> {
    Arc::new(FakeReviewerClient::new(ReviewVerdict { is_illegal: true, description: description.to_string(), keywords: vec!["forbidden".to_string()] }))
}

pub fn discovery(name: &str, namespace: &str, host: &str) -> DiscoveryInfo {
    let mut info = DiscoveryInfo::new("cron-complete", name, namespace, host);
    info.has_active_pods = true;
    info.pod_count = 1;
    info
}
