//! Shared data model for the pipeline core and the process scanner.
//!
//! Every record here is produced once by its owning stage and flows forward
//! immutably: later stages wrap the record in a richer type rather than
//! mutating it in place (see `CollectorInfo`/`DetectorInfo` embedding the
//! originating `DiscoveryInfo` fields).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/* ============================= CONTAINER ID ============================= */

/// A validated container identifier: 64 lowercase hex characters.
///
/// Extracted from `/proc/<pid>/cgroup` by stripping the `cri-containerd-`
/// prefix and `.scope` suffix from the matching path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContainerIdError {
    #[error("container id must be exactly 64 characters, got {0}")]
    WrongLength(usize),
    #[error("container id must be lowercase hex")]
    NotHex,
}

impl ContainerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ContainerId {
    type Error = ContainerIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != 64 {
            return Err(ContainerIdError::WrongLength(value.len()));
        }
        if !value.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(ContainerIdError::NotHex);
        }
        Ok(Self(value.to_string()))
    }
}

/* ============================= DISCOVERY ============================= */

/// A network-reachable workload identified for inspection.
///
/// `podCount == 0` means the collector must short-circuit with an empty
/// `CollectorInfo` rather than doing any browser work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryInfo {
    /// Tag of the plugin that produced this record (e.g. `"cron-complete"`).
    pub discovery_name: String,
    pub name: String,
    pub namespace: String,
    /// Bare host or a URL with scheme already applied.
    pub host: String,
    /// Ordered, non-empty. Defaults to `["/"]`.
    pub path: Vec<String>,
    pub service_name: String,
    pub has_active_pods: bool,
    pub pod_count: u32,
}

impl DiscoveryInfo {
    pub fn new(discovery_name: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            discovery_name: discovery_name.into(),
            name: name.into(),
            namespace: namespace.into(),
            host: host.into(),
            path: vec!["/".to_string()],
            service_name: String::new(),
            has_active_pods: false,
            pod_count: 0,
        }
    }

    /// Formats a navigable URL: prepends `http://` when `host` carries no scheme.
    pub fn url(&self) -> String {
        if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("http://{}", self.host)
        }
    }
}

/* ============================= COLLECTOR ============================= */

/// Captured artifact for a single discovery.
///
/// `isEmpty == true` implies `html` and `screenshot` are both empty; this
/// invariant is enforced by the constructors below rather than left to
/// caller discipline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorInfo {
    pub discovery_name: String,
    pub name: String,
    pub namespace: String,
    pub host: String,
    pub path: Vec<String>,
    pub service_name: String,
    pub has_active_pods: bool,
    pub pod_count: u32,

    pub url: String,
    pub html: String,
    #[serde(with = "serde_bytes_as_base64")]
    pub screenshot: Vec<u8>,
    pub is_empty: bool,
    pub collector_name: String,
    pub collector_message: String,
}

impl CollectorInfo {
    /// Builds the short-circuit / failure-path record: no HTML, no screenshot.
    pub fn empty(discovery: &DiscoveryInfo, collector_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            discovery_name: discovery.discovery_name.clone(),
            name: discovery.name.clone(),
            namespace: discovery.namespace.clone(),
            host: discovery.host.clone(),
            path: discovery.path.clone(),
            service_name: discovery.service_name.clone(),
            has_active_pods: discovery.has_active_pods,
            pod_count: discovery.pod_count,
            url: discovery.url(),
            html: String::new(),
            screenshot: Vec::new(),
            is_empty: true,
            collector_name: collector_name.into(),
            collector_message: message.into(),
        }
    }

    pub fn populated(discovery: &DiscoveryInfo, collector_name: impl Into<String>, url: String, html: String, screenshot: Vec<u8>) -> Self {
        Self {
            discovery_name: discovery.discovery_name.clone(),
            name: discovery.name.clone(),
            namespace: discovery.namespace.clone(),
            host: discovery.host.clone(),
            path: discovery.path.clone(),
            service_name: discovery.service_name.clone(),
            has_active_pods: discovery.has_active_pods,
            pod_count: discovery.pod_count,
            url,
            html,
            screenshot,
            is_empty: false,
            collector_name: collector_name.into(),
            collector_message: String::new(),
        }
    }
}

mod serde_bytes_as_base64 {
    use base64::Engine;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/* ============================= DETECTOR ============================= */

/// Verdict on a `CollectorInfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorInfo {
    pub discovery_name: String,
    pub name: String,
    pub namespace: String,
    pub host: String,
    pub path: Vec<String>,
    pub service_name: String,
    pub has_active_pods: bool,
    pub pod_count: u32,

    pub detector_name: String,
    pub is_illegal: bool,
    pub description: String,
    pub keywords: Vec<String>,
    pub region: String,
    pub url: String,
}

impl DetectorInfo {
    /// The verdict emitted when the collector already determined there is
    /// nothing to review — the reviewer is never invoked for an empty input.
    pub fn legal_from_empty(collected: &CollectorInfo, detector_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            discovery_name: collected.discovery_name.clone(),
            name: collected.name.clone(),
            namespace: collected.namespace.clone(),
            host: collected.host.clone(),
            path: collected.path.clone(),
            service_name: collected.service_name.clone(),
            has_active_pods: collected.has_active_pods,
            pod_count: collected.pod_count,
            detector_name: detector_name.into(),
            is_illegal: false,
            description: String::new(),
            keywords: Vec::new(),
            region: region.into(),
            url: collected.url.clone(),
        }
    }
}

/* ============================= PROCESS SCANNER ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    App,
    Devbox,
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppType::App => f.write_str("app"),
            AppType::Devbox => f.write_str("devbox"),
        }
    }
}

/// A suspicious process detected on a node.
///
/// Construction is gated on the tenant prefix: nothing upstream should ever
/// hand this type a namespace that doesn't start with `ns-` (see
/// `AnalyzeProcess` step 9), so the constructor asserts it defensively at
/// the one boundary where that invariant could otherwise be violated by a
/// future caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub process_name: String,
    pub command: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub container_id: ContainerId,
    pub message: String,
    pub pod_name: String,
    pub namespace: String,
    pub pod_labels: BTreeMap<String, String>,
    pub app_type: AppType,
    pub app_name: String,
    pub matched_rule: String,
}

pub const TENANT_PREFIX: &str = "ns-";

impl ProcessInfo {
    pub fn namespace_is_tenant(namespace: &str) -> bool {
        namespace.starts_with(TENANT_PREFIX)
    }
}

/* ============================= VIOLATION RECORD ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViolationRecord {
    pub pod: String,
    pub namespace: String,
    pub process: String,
    pub cmdline: String,
    pub regex: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: AppType,
    pub name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ViolationRecord {
    pub fn key(namespace: &str, pod: &str, process: &str) -> String {
        format!("{namespace}/{pod}/{process}")
    }

    pub fn from_process_info(info: &ProcessInfo) -> Self {
        Self {
            pod: info.pod_name.clone(),
            namespace: info.namespace.clone(),
            process: info.process_name.clone(),
            cmdline: info.command.clone(),
            regex: info.matched_rule.clone(),
            status: "active".to_string(),
            kind: info.app_type,
            name: info.app_name.clone(),
            timestamp: info.timestamp,
        }
    }
}

/* ============================= DETECTION RULES ============================= */

/// Blacklist rules compiled from configured regex strings.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    pub processes: Vec<regex::Regex>,
    pub keywords: Vec<regex::Regex>,
}

/// Whitelist rules compiled from configured regex strings.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    pub processes: Vec<regex::Regex>,
    pub commands: Vec<regex::Regex>,
    pub namespaces: Vec<regex::Regex>,
    pub pod_names: Vec<regex::Regex>,
}

/// Compiled blacklist/whitelist rule sets.
///
/// Invalid regexes are skipped with a warning at compile time (see
/// `RawDetectionRules::compile`) and never cause startup failure.
#[derive(Debug, Clone, Default)]
pub struct DetectionRules {
    pub blacklist: Blacklist,
    pub whitelist: Whitelist,
}

/// Wire format for `DetectionRules`: plain strings, compiled on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDetectionRules {
    #[serde(default)]
    pub blacklist: RawBlacklist,
    #[serde(default)]
    pub whitelist: RawWhitelist,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBlacklist {
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWhitelist {
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub pod_names: Vec<String>,
}

fn compile_all(patterns: &[String]) -> Vec<regex::Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match regex::Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err, "skipping invalid detection rule regex");
                None
            }
        })
        .collect()
}

impl RawDetectionRules {
    /// Compiles every configured pattern, dropping invalid ones with a
    /// warning. Never fails: a rule set with every pattern invalid simply
    /// compiles to an empty rule set.
    pub fn compile(&self) -> DetectionRules {
        DetectionRules {
            blacklist: Blacklist {
                processes: compile_all(&self.blacklist.processes),
                keywords: compile_all(&self.blacklist.keywords),
            },
            whitelist: Whitelist {
                processes: compile_all(&self.whitelist.processes),
                commands: compile_all(&self.whitelist.commands),
                namespaces: compile_all(&self.whitelist.namespaces),
                pod_names: compile_all(&self.whitelist.pod_names),
            },
        }
    }
}
