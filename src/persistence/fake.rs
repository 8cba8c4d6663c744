use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{VerdictRecord, VerdictStore};

#[derive(Default)]
pub struct FakeVerdictStore {
    pub records: Mutex<Vec<VerdictRecord>>,
    pub fail: AtomicBool,
}

impl FakeVerdictStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<VerdictRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl VerdictStore for FakeVerdictStore {
    async fn insert(&self, record: VerdictRecord) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("fake verdict store: insert failed");
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
