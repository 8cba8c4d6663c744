//! In-memory [`ReviewerClient`]/keyword-rule-store doubles for detector
//! plugin tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::custom::KeywordRuleStore;
use super::{CustomKeywordRule, ReviewRequest, ReviewVerdict, ReviewerClient};

pub struct FakeReviewerClient {
    pub verdict: Mutex<ReviewVerdict>,
    pub fail: std::sync::atomic::AtomicBool,
    pub calls: AtomicU64,
}

impl FakeReviewerClient {
    pub fn new(verdict: ReviewVerdict) -> Self {
        Self { verdict: Mutex::new(verdict), fail: std::sync::atomic::AtomicBool::new(false), calls: AtomicU64::new(0) }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewerClient for FakeReviewerClient {
    async fn review(&self, _request: ReviewRequest) -> anyhow::Result<ReviewVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("fake reviewer failure");
        }
        Ok(self.verdict.lock().expect("lock poisoned").clone())
    }
}

pub struct FakeKeywordRuleStore {
    pub rules: Mutex<Vec<CustomKeywordRule>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl FakeKeywordRuleStore {
    pub fn new(rules: Vec<CustomKeywordRule>) -> Self {
        Self { rules: Mutex::new(rules), fail: std::sync::atomic::AtomicBool::new(false) }
    }
}

#[async_trait]
impl KeywordRuleStore for FakeKeywordRuleStore {
    async fn list_rules(&self) -> anyhow::Result<Vec<CustomKeywordRule>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("fake keyword rule store failure");
        }
        Ok(self.rules.lock().expect("lock poisoned").clone())
    }
}
