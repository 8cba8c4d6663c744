//! Page collector: navigates a [`DiscoveryInfo`] target in a pooled
//! headless browser, captures HTML and a JPEG screenshot, and classifies
//! empty/error pages without ever surfacing them as failures.

pub mod plugin;

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::browser::{BrowserLease, BrowserPage, BrowserPool};
use crate::models::{CollectorInfo, DiscoveryInfo};

const VIEWPORT_WIDTH: u32 = 1366;
const VIEWPORT_HEIGHT: u32 = 768;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const SCREENSHOT_QUALITY: u8 = 75;
const ERROR_PAGE_HTML_MAX_LEN: usize = 400;

const ERROR_PAGE_PHRASES: &[&str] = &[
    "upstream connect error",
    "no healthy upstream",
    "404 page not found",
    "403 forbidden",
    "405 method not allowed",
    "not found",
    "function not found",
];

const BAD_DOCUMENT_STATUSES: &[u16] = &[404, 502, 503, 504];

/// Known-transient browser/network failures the collector plugin still
/// reports as an empty observation rather than silently dropping.
const TRANSIENT_ERROR_MARKERS: &[&str] = &[
    "err_http_response_code_failure",
    "err_invalid_response",
    "err_empty_response",
    "err_connection_reset",
    "err_name_not_resolved",
    "navigation failed",
];

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to acquire browser instance: {0}")]
    Acquire(String),
    #[error("navigation failed: {0}")]
    Navigate(String),
    #[error("page load failed: {0}")]
    Load(String),
    #[error("screenshot failed: {0}")]
    Screenshot(String),
    #[error("collection deadline exceeded")]
    Timeout,
}

impl CollectError {
    pub fn is_transient(&self) -> bool {
        if matches!(self, CollectError::Timeout) {
            return true;
        }
        let msg = self.to_string().to_lowercase();
        TRANSIENT_ERROR_MARKERS.iter().any(|marker| msg.contains(marker))
    }
}

fn looks_like_error_page(html: &str) -> bool {
    if html.len() >= ERROR_PAGE_HTML_MAX_LEN {
        return false;
    }
    let lower = html.to_lowercase();
    ERROR_PAGE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Closes the page on drop regardless of how the enclosing future exits —
/// normal return, early return, panic unwind, or cancellation from an
/// outer `tokio::time::timeout`.
struct PageGuard {
    page: Option<Box<dyn BrowserPage>>,
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            tokio::spawn(async move { page.close().await });
        }
    }
}

impl PageGuard {
    fn page(&self) -> &dyn BrowserPage {
        self.page.as_deref().expect("page present for the guard's lifetime")
    }
}

async fn run_page(lease: &BrowserLease, discovery: &DiscoveryInfo) -> Result<Option<(String, Vec<u8>)>, CollectError> {
    let page = lease.handle.open_page().await.map_err(|e| CollectError::Navigate(e.to_string()))?;
    let guard = PageGuard { page: Some(page) };

    let _ = guard.page().set_viewport(VIEWPORT_WIDTH, VIEWPORT_HEIGHT, USER_AGENT).await;

    guard.page().navigate(&discovery.url()).await.map_err(|e| CollectError::Navigate(e.to_string()))?;

    if let Some(status) = guard.page().document_response_status().await {
        if BAD_DOCUMENT_STATUSES.contains(&status) {
            return Ok(None);
        }
    }

    guard.page().wait_for_load().await.map_err(|e| CollectError::Load(e.to_string()))?;

    let html = guard.page().content().await.map_err(|e| CollectError::Load(e.to_string()))?;
    if looks_like_error_page(&html) {
        return Ok(None);
    }

    let screenshot = guard.page().screenshot_jpeg(SCREENSHOT_QUALITY).await.map_err(|e| CollectError::Screenshot(e.to_string()))?;
    Ok(Some((html, screenshot)))
}

/// Runs the full collection algorithm for one `DiscoveryInfo`. Always
/// returns a `CollectorInfo` on the happy and short-circuit paths; returns
/// `Err` only when the pool or browser RPC genuinely failed, leaving the
/// caller (the plugin's semaphore wrapper) to classify transient vs.
/// hard failures.
pub async fn collect_one(pool: &BrowserPool, discovery: &DiscoveryInfo, collector_name: &str, collector_timeout_second: u64) -> Result<CollectorInfo, CollectError> {
    if discovery.pod_count == 0 {
        return Ok(CollectorInfo::empty(discovery, collector_name, "podCount is 0, skipping browser work"));
    }

    let deadline = Duration::from_secs(collector_timeout_second.max(1));

    let acquire_ctx = CancellationToken::new();
    let canceller = acquire_ctx.clone();
    let sleeper = tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        canceller.cancel();
    });

    let lease = match pool.get(&acquire_ctx).await {
        Ok(lease) => lease,
        Err(err) => {
            sleeper.abort();
            return Err(CollectError::Acquire(err.to_string()));
        }
    };
    sleeper.abort();

    let outcome = tokio::time::timeout(deadline, run_page(&lease, discovery)).await;
    pool.put(lease).await;

    match outcome {
        Ok(Ok(Some((html, screenshot)))) => Ok(CollectorInfo::populated(discovery, collector_name, discovery.url(), html, screenshot)),
        Ok(Ok(None)) => Ok(CollectorInfo::empty(discovery, collector_name, "error page detected")),
        Ok(Err(err)) => Err(err),
        Err(_) => {
            warn!(host = %discovery.host, "collector: deadline exceeded");
            Err(CollectError::Timeout)
        }
    }
}
