//! `AnalyzeProcess`: the detection heart of a single scan pass, steps 1-11
//! of the per-pid pipeline — cmdline read, blacklist/whitelist matching,
//! container-main resolution, cgroup container-ID extraction, metadata
//! lookup, tenant gate, app-type classification.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::models::{AppType, ContainerId, DetectionRules, ProcessInfo, TENANT_PREFIX};

use super::container_runtime::ContainerRuntimeClient;
use super::proc_fs::{extract_container_id, ProcFilesystem};

const DEVBOX_LABEL: &str = "devbox.sealos.io/name";
const APP_KUBERNETES_NAME_LABEL: &str = "app.kubernetes.io/name";
const APP_LABEL: &str = "app";

/// Why a pid produced no `ProcessInfo`. Every variant is a "log and skip",
/// never fatal to the round.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    EmptyCmdline,
    NoRuleMatch,
    Whitelisted,
    NoContainerId,
    MetadataLookupFailed(String),
    InfrastructureWhitelisted,
    NotTenantNamespace,
}

fn process_name(cmdline: &[String]) -> String {
    cmdline
        .first()
        .and_then(|argv0| argv0.rsplit('/').next())
        .unwrap_or_default()
        .to_string()
}

/// Finds the matching blacklist rule, preferring a process-name match over
/// a cmdline-keyword match (the process name is the more specific fact).
fn matching_blacklist_rule(rules: &DetectionRules, process_name: &str, cmdline_joined: &str) -> Option<String> {
    for re in &rules.blacklist.processes {
        if re.is_match(process_name) {
            return Some(re.as_str().to_string());
        }
    }
    for re in &rules.blacklist.keywords {
        if re.is_match(cmdline_joined) {
            return Some(re.as_str().to_string());
        }
    }
    None
}

fn is_whitelisted(rules: &DetectionRules, process_name: &str, cmdline_joined: &str) -> bool {
    rules.whitelist.processes.iter().any(|re| re.is_match(process_name)) || rules.whitelist.commands.iter().any(|re| re.is_match(cmdline_joined))
}

fn is_infrastructure_whitelisted(rules: &DetectionRules, namespace: &str, pod_name: &str) -> bool {
    rules.whitelist.namespaces.iter().any(|re| re.is_match(namespace)) || rules.whitelist.pod_names.iter().any(|re| re.is_match(pod_name))
}

fn classify_app(labels: &BTreeMap<String, String>, pod_name: &str) -> (AppType, String) {
    if let Some(name) = labels.get(DEVBOX_LABEL) {
        return (AppType::Devbox, name.clone());
    }
    if let Some(name) = labels.get(APP_KUBERNETES_NAME_LABEL).or_else(|| labels.get(APP_LABEL)) {
        return (AppType::App, name.clone());
    }
    (AppType::App, pod_name.to_string())
}

/// Walks `NSpid`/`PPid` to find the pid that is a container's main process:
/// its `NSpid` list has ≥2 entries and the innermost is `1`. Cycle and
/// reached-PPid-0 both fall back to the original pid.
async fn resolve_container_main(fs: &dyn ProcFilesystem, pid: i32) -> i32 {
    let mut current = pid;
    let mut visited = HashSet::new();

    loop {
        if !visited.insert(current) {
            debug!(pid, cycle_at = current, "ppid walk hit a cycle, using the original pid");
            return pid;
        }

        let status = match fs.read_status(current).await {
            Ok(status) => status,
            Err(_) => return pid,
        };

        if status.nspid.len() >= 2 && status.nspid.last() == Some(&1) {
            return current;
        }

        if status.ppid == 0 {
            return pid;
        }
        current = status.ppid;
    }
}

pub async fn analyze_process(
    fs: &dyn ProcFilesystem,
    runtime: &dyn ContainerRuntimeClient,
    rules: &DetectionRules,
    pid: i32,
) -> Result<ProcessInfo, SkipReason> {
    let cmdline = fs.read_cmdline(pid).await.unwrap_or_default();
    if cmdline.is_empty() {
        return Err(SkipReason::EmptyCmdline);
    }

    let name = process_name(&cmdline);
    let joined = cmdline.join(" ");

    let matched_rule = matching_blacklist_rule(rules, &name, &joined).ok_or(SkipReason::NoRuleMatch)?;

    if is_whitelisted(rules, &name, &joined) {
        return Err(SkipReason::Whitelisted);
    }

    let main_pid = resolve_container_main(fs, pid).await;

    let cgroup_lines = fs.read_cgroup(main_pid).await.unwrap_or_default();
    let container_id_raw = extract_container_id(&cgroup_lines).ok_or(SkipReason::NoContainerId)?;
    let container_id = ContainerId::try_from(container_id_raw.as_str()).map_err(|_| SkipReason::NoContainerId)?;

    let metadata = runtime.inspect(&container_id).await.map_err(|err| SkipReason::MetadataLookupFailed(err.to_string()))?;

    if is_infrastructure_whitelisted(rules, &metadata.namespace, &metadata.pod_name) {
        return Err(SkipReason::InfrastructureWhitelisted);
    }

    if !metadata.namespace.starts_with(TENANT_PREFIX) {
        return Err(SkipReason::NotTenantNamespace);
    }

    let (app_type, app_name) = classify_app(&metadata.labels, &metadata.pod_name);

    Ok(ProcessInfo {
        pid,
        process_name: name,
        command: joined,
        timestamp: chrono::Utc::now(),
        container_id,
        message: matched_rule,
        pod_name: metadata.pod_name,
        namespace: metadata.namespace,
        pod_labels: metadata.labels,
        app_type,
        app_name,
        matched_rule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawBlacklist, RawDetectionRules, RawWhitelist};
    use crate::scanner::container_runtime::FakeContainerRuntimeClient;
    use crate::scanner::proc_fs::{FakeProcEntry, FakeProcFilesystem, ProcStatus};

    fn blacklisted_rules() -> DetectionRules {
        RawDetectionRules {
            blacklist: RawBlacklist { processes: vec!["^xmrig$".to_string()], keywords: vec![] },
            whitelist: RawWhitelist::default(),
        }
        .compile()
    }

    fn container_id() -> String {
        "b".repeat(64)
    }

    fn miner_fs(pid: i32, main_pid: i32) -> FakeProcFilesystem {
        let mut fs = FakeProcFilesystem::new();
        fs.insert(
            pid,
            FakeProcEntry {
                cmdline: vec!["/usr/bin/xmrig".to_string(), "--donate-level=1".to_string()],
                status: ProcStatus { nspid: vec![pid, 1], ppid: 1 },
                cgroup: vec![format!("0::/kubepods/cri-containerd-{}.scope", container_id())],
            },
        );
        if main_pid != pid {
            fs.insert(main_pid, FakeProcEntry { status: ProcStatus { nspid: vec![main_pid, 1], ppid: 0 }, ..Default::default() });
        }
        fs
    }

    fn runtime_with_tenant_pod() -> FakeContainerRuntimeClient {
        let runtime = FakeContainerRuntimeClient::new();
        runtime.insert(
            &container_id(),
            super::ContainerMetadata {
                pod_name: "miner-pod".to_string(),
                namespace: "ns-alice".to_string(),
                labels: BTreeMap::from([("app.kubernetes.io/name".to_string(), "miner-app".to_string())]),
            },
        );
        runtime
    }

    #[tokio::test]
    async fn full_pipeline_emits_process_info_for_a_blacklisted_tenant_workload() {
        let fs = miner_fs(42, 42);
        let runtime = runtime_with_tenant_pod();
        let rules = blacklisted_rules();

        let info = analyze_process(&fs, &runtime, &rules, 42).await.expect("should be detected");
        assert_eq!(info.process_name, "xmrig");
        assert_eq!(info.app_type, AppType::App);
        assert_eq!(info.app_name, "miner-app");
        assert_eq!(info.matched_rule, "^xmrig$");
        assert_eq!(info.namespace, "ns-alice");
    }

    #[tokio::test]
    async fn empty_cmdline_is_skipped() {
        let mut fs = FakeProcFilesystem::new();
        fs.insert(1, FakeProcEntry::default());
        let runtime = FakeContainerRuntimeClient::new();
        let rules = blacklisted_rules();

        assert_eq!(analyze_process(&fs, &runtime, &rules, 1).await, Err(SkipReason::EmptyCmdline));
    }

    #[tokio::test]
    async fn no_blacklist_match_is_skipped() {
        let mut fs = FakeProcFilesystem::new();
        fs.insert(1, FakeProcEntry { cmdline: vec!["/bin/sh".to_string()], ..Default::default() });
        let runtime = FakeContainerRuntimeClient::new();
        let rules = blacklisted_rules();

        assert_eq!(analyze_process(&fs, &runtime, &rules, 1).await, Err(SkipReason::NoRuleMatch));
    }

    #[tokio::test]
    async fn whitelisted_process_short_circuits_before_container_resolution() {
        let fs = miner_fs(42, 42);
        let runtime = runtime_with_tenant_pod();
        let rules = RawDetectionRules {
            blacklist: RawBlacklist { processes: vec!["^xmrig$".to_string()], keywords: vec![] },
            whitelist: RawWhitelist { processes: vec!["^xmrig$".to_string()], ..Default::default() },
        }
        .compile();

        assert_eq!(analyze_process(&fs, &runtime, &rules, 42).await, Err(SkipReason::Whitelisted));
    }

    #[tokio::test]
    async fn non_tenant_namespace_is_skipped() {
        let fs = miner_fs(42, 42);
        let runtime = FakeContainerRuntimeClient::new();
        runtime.insert(&container_id(), super::ContainerMetadata { pod_name: "sys-pod".to_string(), namespace: "kube-system".to_string(), labels: BTreeMap::new() });
        let rules = blacklisted_rules();

        assert_eq!(analyze_process(&fs, &runtime, &rules, 42).await, Err(SkipReason::NotTenantNamespace));
    }

    #[tokio::test]
    async fn infrastructure_whitelisted_namespace_is_skipped_before_the_tenant_gate() {
        let fs = miner_fs(42, 42);
        let runtime = runtime_with_tenant_pod();
        let rules = RawDetectionRules {
            blacklist: RawBlacklist { processes: vec!["^xmrig$".to_string()], keywords: vec![] },
            whitelist: RawWhitelist { namespaces: vec!["^ns-alice$".to_string()], ..Default::default() },
        }
        .compile();

        assert_eq!(analyze_process(&fs, &runtime, &rules, 42).await, Err(SkipReason::InfrastructureWhitelisted));
    }

    #[tokio::test]
    async fn devbox_label_wins_over_app_labels() {
        let fs = miner_fs(42, 42);
        let runtime = FakeContainerRuntimeClient::new();
        runtime.insert(
            &container_id(),
            super::ContainerMetadata {
                pod_name: "devbox-pod".to_string(),
                namespace: "ns-alice".to_string(),
                labels: BTreeMap::from([("devbox.sealos.io/name".to_string(), "my-devbox".to_string()), ("app".to_string(), "ignored".to_string())]),
            },
        );
        let rules = blacklisted_rules();

        let info = analyze_process(&fs, &runtime, &rules, 42).await.expect("should be detected");
        assert_eq!(info.app_type, AppType::Devbox);
        assert_eq!(info.app_name, "my-devbox");
    }

    #[tokio::test]
    async fn no_identifying_label_falls_back_to_pod_name() {
        let fs = miner_fs(42, 42);
        let runtime = FakeContainerRuntimeClient::new();
        runtime.insert(&container_id(), super::ContainerMetadata { pod_name: "bare-pod".to_string(), namespace: "ns-alice".to_string(), labels: BTreeMap::new() });
        let rules = blacklisted_rules();

        let info = analyze_process(&fs, &runtime, &rules, 42).await.expect("should be detected");
        assert_eq!(info.app_name, "bare-pod");
    }

    #[tokio::test]
    async fn ppid_walk_finds_the_container_main_ancestor() {
        // pid 42 is NOT itself the container main (nspid has only one entry);
        // its parent 7 is (nspid innermost == 1). The cgroup lives on pid 7.
        let mut fs = FakeProcFilesystem::new();
        fs.insert(
            42,
            FakeProcEntry {
                cmdline: vec!["/usr/bin/xmrig".to_string()],
                status: ProcStatus { nspid: vec![99999], ppid: 7 },
                cgroup: vec![],
            },
        );
        fs.insert(7, FakeProcEntry { status: ProcStatus { nspid: vec![7, 1], ppid: 1 }, cgroup: vec![format!("0::/kubepods/cri-containerd-{}.scope", container_id())], ..Default::default() });

        let runtime = runtime_with_tenant_pod();
        let rules = blacklisted_rules();

        let info = analyze_process(&fs, &runtime, &rules, 42).await.expect("should be detected via ancestor");
        assert_eq!(info.pid, 42, "the emitted ProcessInfo still carries the original pid");
    }

    #[tokio::test]
    async fn a_cycle_in_the_ppid_walk_falls_back_to_the_original_pid_with_no_container_id() {
        let mut fs = FakeProcFilesystem::new();
        fs.insert(1, FakeProcEntry { cmdline: vec!["/usr/bin/xmrig".to_string()], status: ProcStatus { nspid: vec![55], ppid: 2 }, cgroup: vec![] });
        fs.insert(2, FakeProcEntry { status: ProcStatus { nspid: vec![56], ppid: 1 }, ..Default::default() });

        let runtime = FakeContainerRuntimeClient::new();
        let rules = blacklisted_rules();

        assert_eq!(analyze_process(&fs, &runtime, &rules, 1).await, Err(SkipReason::NoContainerId));
    }
}
