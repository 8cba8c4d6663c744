//! Persistence sink: appends one row per `DetectorInfo`, behind a
//! [`VerdictStore`] trait so the concrete database dialect stays out of
//! scope. `sqlite_store` is the `sqlx`-backed implementation; `fake` backs
//! the sink-plugin tests.

pub mod fake;
pub mod plugin;
pub mod sqlite_store;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::DetectorInfo;

/// One persisted row: provenance fields plus the verdict, with `path` and
/// `keywords` pre-serialized to JSON strings (`None` when empty, matching
/// the "null, not `[]`" wire contract).
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictRecord {
    pub discovery_name: String,
    pub name: String,
    pub namespace: String,
    pub host: String,
    pub path_json: Option<String>,
    pub service_name: String,
    pub has_active_pods: bool,
    pub pod_count: u32,
    pub detector_name: String,
    pub is_illegal: bool,
    pub description: String,
    pub keywords_json: Option<String>,
    pub region: String,
    pub url: String,
}

fn json_array_or_null<T: Serialize>(items: &[T]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(serde_json::to_string(items).expect("Vec<String>/Vec<path segment> always serializes"))
    }
}

impl From<&DetectorInfo> for VerdictRecord {
    fn from(info: &DetectorInfo) -> Self {
        Self {
            discovery_name: info.discovery_name.clone(),
            name: info.name.clone(),
            namespace: info.namespace.clone(),
            host: info.host.clone(),
            path_json: json_array_or_null(&info.path),
            service_name: info.service_name.clone(),
            has_active_pods: info.has_active_pods,
            pod_count: info.pod_count,
            detector_name: info.detector_name.clone(),
            is_illegal: info.is_illegal,
            description: info.description.clone(),
            keywords_json: json_array_or_null(&info.keywords),
            region: info.region.clone(),
            url: info.url.clone(),
        }
    }
}

/// Append-only verdict sink. Implementations must ensure their backing
/// schema exists before the first `insert`.
#[async_trait]
pub trait VerdictStore: Send + Sync {
    async fn insert(&self, record: VerdictRecord) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveryInfo;

    fn detector_info(path: Vec<String>, keywords: Vec<String>) -> DetectorInfo {
        let discovery = DiscoveryInfo::new("cron-complete", "api", "ns-alice", "api.example.com");
        DetectorInfo {
            discovery_name: discovery.discovery_name,
            name: discovery.name,
            namespace: discovery.namespace,
            host: discovery.host,
            path,
            service_name: discovery.service_name,
            has_active_pods: discovery.has_active_pods,
            pod_count: discovery.pod_count,
            detector_name: "safety-detector".to_string(),
            is_illegal: false,
            description: String::new(),
            keywords,
            region: "us".to_string(),
            url: "http://api.example.com/".to_string(),
        }
    }

    #[test]
    fn empty_path_and_keywords_serialize_to_null() {
        let record = VerdictRecord::from(&detector_info(vec![], vec![]));
        assert_eq!(record.path_json, None);
        assert_eq!(record.keywords_json, None);
    }

    #[test]
    fn populated_path_and_keywords_serialize_to_json_arrays() {
        let record = VerdictRecord::from(&detector_info(vec!["/".to_string()], vec!["bad".to_string()]));
        assert_eq!(record.path_json.as_deref(), Some(r#"["/"]"#));
        assert_eq!(record.keywords_json.as_deref(), Some(r#"["bad"]"#));
    }
}
