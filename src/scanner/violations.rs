//! Violation-record store: last-write-wins map keyed by
//! `namespace/pod/process`, exposed read-only to the operator API.

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use crate::models::{ProcessInfo, ViolationRecord};

#[derive(Default)]
pub struct ViolationStore {
    records: RwLock<BTreeMap<String, ViolationRecord>>,
}

impl ViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, info: &ProcessInfo) {
        let key = ViolationRecord::key(&info.namespace, &info.pod_name, &info.process_name);
        self.records.write().await.insert(key, ViolationRecord::from_process_info(info));
    }

    pub async fn snapshot(&self) -> Vec<ViolationRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppType, ContainerId};
    use std::collections::BTreeMap as Map;

    fn process_info(pod: &str, process: &str) -> ProcessInfo {
        ProcessInfo {
            pid: 1,
            process_name: process.to_string(),
            command: format!("/usr/bin/{process}"),
            timestamp: chrono::Utc::now(),
            container_id: ContainerId::try_from("a".repeat(64).as_str()).unwrap(),
            message: "^xmrig$".to_string(),
            pod_name: pod.to_string(),
            namespace: "ns-alice".to_string(),
            pod_labels: Map::new(),
            app_type: AppType::App,
            app_name: "miner-app".to_string(),
            matched_rule: "^xmrig$".to_string(),
        }
    }

    #[tokio::test]
    async fn a_second_write_for_the_same_key_overwrites_the_first() {
        let store = ViolationStore::new();
        store.record(&process_info("pod-a", "xmrig")).await;
        let mut updated = process_info("pod-a", "xmrig");
        updated.command = "/usr/bin/xmrig --updated".to_string();
        store.record(&updated).await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].cmdline, "/usr/bin/xmrig --updated");
    }

    #[tokio::test]
    async fn distinct_keys_both_persist() {
        let store = ViolationStore::new();
        store.record(&process_info("pod-a", "xmrig")).await;
        store.record(&process_info("pod-b", "xmrig")).await;
        assert_eq!(store.snapshot().await.len(), 2);
    }
}
