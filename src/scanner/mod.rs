//! ProcScan: the per-node process scanner. Runs independently of the
//! plugin pipeline's event bus — its own ticker, its own worker pool,
//! sharing only the `ClusterApi` labeling capability.
//!
//! Module layout: [`proc_fs`] and [`container_runtime`] are the
//! filesystem/runtime capability surfaces `analyze::analyze_process` (the
//! `AnalyzeProcess` detection heart) depends on; [`notify`] is the
//! consolidated-alert sink; [`violations`] is the last-write-wins record
//! store; [`api`] is the read-only operator HTTP surface.

pub mod analyze;
pub mod api;
pub mod container_runtime;
pub mod notify;
pub mod proc_fs;
pub mod violations;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::k8s::ClusterApi;
use crate::metrics;
use crate::models::ProcessInfo;

use analyze::{analyze_process, SkipReason};
use api::ReadinessFlag;
use container_runtime::ContainerRuntimeClient;
use notify::{ConsolidatedAlert, LabelOutcome, NamespaceAlert, NotificationSink};
use proc_fs::ProcFilesystem;
use violations::ViolationStore;

const SEVERITY_HIGH: &str = "high";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Scanning,
    Stopping,
    Stopped,
}

impl ScannerState {
    fn encode(self) -> u8 {
        match self {
            ScannerState::Idle => 0,
            ScannerState::Scanning => 1,
            ScannerState::Stopping => 2,
            ScannerState::Stopped => 3,
        }
    }

    fn decode(value: u8) -> Self {
        match value {
            1 => ScannerState::Scanning,
            2 => ScannerState::Stopping,
            3 => ScannerState::Stopped,
            _ => ScannerState::Idle,
        }
    }
}

pub struct Scanner {
    cluster: Arc<dyn ClusterApi>,
    container_runtime: Arc<dyn ContainerRuntimeClient>,
    proc_fs: Arc<dyn ProcFilesystem>,
    notifier: Arc<dyn NotificationSink>,
    violations: Arc<ViolationStore>,
    state: AtomicU8,
}

impl Scanner {
    pub fn new(cluster: Arc<dyn ClusterApi>, container_runtime: Arc<dyn ContainerRuntimeClient>, proc_fs: Arc<dyn ProcFilesystem>, notifier: Arc<dyn NotificationSink>, violations: Arc<ViolationStore>) -> Self {
        Self { cluster, container_runtime, proc_fs, notifier, violations, state: AtomicU8::new(ScannerState::Idle.encode()) }
    }

    pub fn state(&self) -> ScannerState {
        ScannerState::decode(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ScannerState) {
        self.state.store(state.encode(), Ordering::SeqCst);
    }

    pub fn violation_store(&self) -> Arc<ViolationStore> {
        self.violations.clone()
    }

    /// Drives the scan ticker; reads a fresh `Config` snapshot each tick so
    /// a hot-reloaded rule set or interval takes effect on the next round,
    /// never mid-round. Tears down to `Stopped` on cancellation.
    pub async fn run(self: Arc<Self>, config: Arc<RwLock<Arc<Config>>>, ctx: CancellationToken, readiness: Arc<ReadinessFlag>) -> anyhow::Result<()> {
        let mut interval_second = config.read().await.scanner.scan_interval_second.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_second));
        ticker.tick().await; // first tick fires immediately; consume it.

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    self.set_state(ScannerState::Stopping);
                    self.set_state(ScannerState::Stopped);
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let snapshot = config.read().await.clone();

                    let fresh_interval = snapshot.scanner.scan_interval_second.max(1);
                    if fresh_interval != interval_second {
                        interval_second = fresh_interval;
                        ticker = tokio::time::interval(Duration::from_secs(interval_second));
                        ticker.tick().await;
                        info!(interval_second, "scanner: scan interval changed, ticker reset");
                    }

                    self.scan_once(&snapshot).await;
                    readiness.mark_ready();
                }
            }
        }
    }

    /// One full scan round: steps 1-5 of the spec's ProcScan algorithm.
    pub async fn scan_once(&self, config: &Config) {
        self.set_state(ScannerState::Scanning);
        let start = Instant::now();
        metrics::SCAN_TOTAL.inc();

        let rules = Arc::new(config.detection_rules.compile());

        let pids = match self.proc_fs.list_pids().await {
            Ok(pids) => pids,
            Err(err) => {
                warn!(error = %err, "scanner: failed to enumerate proc pids, skipping this round");
                metrics::SCAN_ERRORS_TOTAL.inc();
                self.set_state(ScannerState::Idle);
                return;
            }
        };

        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let semaphore = Arc::new(Semaphore::new(worker_count));

        let mut handles = Vec::with_capacity(pids.len());
        for pid in pids {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let proc_fs = self.proc_fs.clone();
            let container_runtime = self.container_runtime.clone();
            let rules = rules.clone();

            handles.push(tokio::spawn(async move {
                metrics::ACTIVE_WORKERS.inc();
                let _permit = permit;
                let result = AssertUnwindSafe(analyze_process(proc_fs.as_ref(), container_runtime.as_ref(), &rules, pid)).catch_unwind().await;
                metrics::ACTIVE_WORKERS.dec();
                result
            }));
        }

        let mut by_namespace: BTreeMap<String, Vec<ProcessInfo>> = BTreeMap::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(Ok(info))) => {
                    by_namespace.entry(info.namespace.clone()).or_default().push(info);
                }
                Ok(Ok(Err(reason))) => log_skip(reason),
                Ok(Err(panic)) => error!(?panic, "scanner: analyze_process task panicked"),
                Err(join_err) => error!(error = %join_err, "scanner: analyze_process task did not complete"),
            }
        }

        let mut namespace_alerts = Vec::with_capacity(by_namespace.len());
        for (namespace, processes) in &by_namespace {
            for info in processes {
                metrics::THREATS_TOTAL.with_label_values(&[info.app_type.to_string().as_str(), SEVERITY_HIGH]).inc();
                self.violations.record(info).await;
            }
            metrics::SUSPICIOUS_PROCESSES_PER_NAMESPACE.with_label_values(&[namespace]).set(processes.len() as i64);

            let label_outcome = if config.label.enabled {
                Some(self.apply_namespace_label(namespace, &config.label.data).await)
            } else {
                None
            };

            namespace_alerts.push(NamespaceAlert { namespace: namespace.clone(), processes: processes.clone(), label_outcome });
        }

        if !namespace_alerts.is_empty() {
            let alert = ConsolidatedAlert { namespaces: namespace_alerts };
            self.send_alert(&alert).await;
        }

        metrics::SCAN_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());
        metrics::sample_process_memory().await;
        self.set_state(ScannerState::Idle);
    }

    async fn apply_namespace_label(&self, namespace: &str, labels: &BTreeMap<String, String>) -> LabelOutcome {
        match self.cluster.label_namespace(namespace, labels).await {
            Ok(()) => {
                metrics::LABEL_OUTCOMES_TOTAL.with_label_values(&["success"]).inc();
                LabelOutcome { namespace: namespace.to_string(), success: true }
            }
            Err(err) => {
                warn!(namespace, error = %err, "scanner: namespace labeling failed");
                metrics::LABEL_OUTCOMES_TOTAL.with_label_values(&["failure"]).inc();
                LabelOutcome { namespace: namespace.to_string(), success: false }
            }
        }
    }

    async fn send_alert(&self, alert: &ConsolidatedAlert) {
        match self.notifier.send(alert).await {
            Ok(()) => metrics::NOTIFICATIONS_TOTAL.with_label_values(&["success"]).inc(),
            Err(err) => {
                warn!(error = %err, "scanner: notification send failed, not retried");
                metrics::NOTIFICATIONS_TOTAL.with_label_values(&["failure"]).inc();
            }
        }
    }
}

fn log_skip(reason: SkipReason) {
    match reason {
        SkipReason::MetadataLookupFailed(err) => warn!(error = %err, "scanner: container metadata lookup failed"),
        other => debug!(?other, "scanner: pid skipped"),
    }
}
