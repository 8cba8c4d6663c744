//! Wires both cores together: the plugin pipeline (discovery -> collector
//! -> detector -> persistence, over the event bus) and the ProcScan
//! scanner (its own ticker, independent of the bus), plus the operator API
//! and metrics endpoint. Shared shutdown via one `CancellationToken`,
//! mirroring the teacher's `watch.rs` broadcast-shutdown pattern.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::fake::FakeBrowserLauncher;
use crate::browser::BrowserPool;
use crate::bus::EventBus;
use crate::collector::plugin::CollectorPlugin;
use crate::config::Config;
use crate::detector::custom::CustomDetector;
use crate::detector::fake::{FakeKeywordRuleStore, FakeReviewerClient};
use crate::detector::safety::SafetyDetector;
use crate::detector::ReviewVerdict;
use crate::discovery::cron_complete::CronCompleteDiscovery;
use crate::discovery::informer_deployment::InformerDeployment;
use crate::discovery::informer_nodeport_service::InformerNodePortService;
use crate::discovery::informer_statefulset::InformerStatefulSet;
use crate::k8s::kube_api::KubeClusterApi;
use crate::k8s::ClusterApi;
use crate::metrics;
use crate::persistence::sqlite_store::SqliteVerdictStore;
use crate::persistence::plugin::PersistenceSink;
use crate::persistence::VerdictStore;
use crate::plugin::{Manager, Plugin, Registry};
use crate::scanner::api::ReadinessFlag;
use crate::scanner::container_runtime::FakeContainerRuntimeClient;
use crate::scanner::notify::{LarkNotificationSink, NoopNotificationSink, NotificationSink};
use crate::scanner::proc_fs::RealProcFilesystem;
use crate::scanner::violations::ViolationStore;
use crate::scanner::Scanner;

/// Size/lifetime the browser pool is built with. Not config-driven: the
/// concrete browser backend is a fake until a real `BrowserLauncher` is
/// wired in, so tuning pool capacity against it has no operational value.
const BROWSER_POOL_MAX_SIZE: usize = 4;
const BROWSER_POOL_MAX_AGE: Duration = Duration::from_secs(600);

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(10);

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

fn build_registry(cluster: Arc<dyn ClusterApi>, store: Arc<dyn VerdictStore>) -> Registry {
    let mut registry = Registry::new();

    registry.register(crate::discovery::cron_complete::PLUGIN_NAME, {
        let cluster = cluster.clone();
        move || Arc::new(CronCompleteDiscovery::new(cluster.clone())) as Arc<dyn Plugin>
    });
    registry.register(crate::discovery::informer_deployment::PLUGIN_NAME, {
        let cluster = cluster.clone();
        move || Arc::new(InformerDeployment::new(cluster.clone())) as Arc<dyn Plugin>
    });
    registry.register(crate::discovery::informer_statefulset::PLUGIN_NAME, {
        let cluster = cluster.clone();
        move || Arc::new(InformerStatefulSet::new(cluster.clone())) as Arc<dyn Plugin>
    });
    registry.register(crate::discovery::informer_nodeport_service::PLUGIN_NAME, {
        let cluster = cluster.clone();
        move || Arc::new(InformerNodePortService::new(cluster.clone())) as Arc<dyn Plugin>
    });

    // The concrete browser-automation and reviewer backends are out of
    // scope (see DESIGN.md); these fakes keep the pipeline runnable end to
    // end until an operator supplies real adapters for the two.
    let launcher = Arc::new(FakeBrowserLauncher::new());
    let pool = BrowserPool::new(launcher, BROWSER_POOL_MAX_SIZE, BROWSER_POOL_MAX_AGE);
    registry.register(crate::collector::plugin::PLUGIN_NAME, {
        let pool = pool.clone();
        move || Arc::new(CollectorPlugin::new(pool.clone())) as Arc<dyn Plugin>
    });

    let reviewer = Arc::new(FakeReviewerClient::new(ReviewVerdict::default()));
    registry.register(crate::detector::safety::PLUGIN_NAME, {
        let reviewer = reviewer.clone();
        move || Arc::new(SafetyDetector::new(reviewer.clone())) as Arc<dyn Plugin>
    });
    let rule_store = Arc::new(FakeKeywordRuleStore::new(Vec::new()));
    registry.register(crate::detector::custom::PLUGIN_NAME, {
        let reviewer = reviewer.clone();
        let rule_store = rule_store.clone();
        move || Arc::new(CustomDetector::new(reviewer.clone(), rule_store.clone())) as Arc<dyn Plugin>
    });

    registry.register(crate::persistence::plugin::PLUGIN_NAME, {
        let store = store.clone();
        move || Arc::new(PersistenceSink::new(store.clone())) as Arc<dyn Plugin>
    });

    registry
}

pub async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let initial = Config::load_from_file(&config_path).await?;
    init_tracing(&initial.scanner.log_level);

    let database_url = initial.database_url.clone();
    let config = Arc::new(RwLock::new(Arc::new(initial)));
    let ctx = CancellationToken::new();

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeClusterApi::try_default().await?);
    let store: Arc<dyn VerdictStore> = Arc::new(SqliteVerdictStore::connect(&database_url).await?);

    let bus = EventBus::new();
    let registry = build_registry(cluster.clone(), store.clone());
    let mut manager = Manager::new(registry, bus);
    manager.load_all(&config.read().await.plugins);
    if let Err(errors) = manager.start_all().await {
        for (name, err) in errors {
            error!(plugin = %name, error = %err, "plugin failed to start");
        }
    }
    info!(plugins = ?manager.loaded_names(), "plugin pipeline started");

    let container_runtime = Arc::new(FakeContainerRuntimeClient::new());
    let proc_fs = Arc::new(RealProcFilesystem::new(config.read().await.scanner.proc_path.clone()));
    let notifier: Arc<dyn NotificationSink> = match config.read().await.resolved_lark_webhook() {
        Some(Ok(url)) => Arc::new(LarkNotificationSink::new(url)),
        Some(Err(err)) => {
            warn!(error = %err, "failed to resolve lark webhook, notifications disabled");
            Arc::new(NoopNotificationSink)
        }
        None => Arc::new(NoopNotificationSink),
    };
    let violations = Arc::new(ViolationStore::new());
    let readiness = Arc::new(ReadinessFlag::new());

    let scanner = Arc::new(Scanner::new(cluster, container_runtime, proc_fs, notifier, violations.clone()));
    let scanner_task = tokio::spawn({
        let scanner = scanner.clone();
        let config = config.clone();
        let ctx = ctx.clone();
        let readiness = readiness.clone();
        async move { scanner.run(config, ctx, readiness).await }
    });

    let watch_task = tokio::spawn(crate::config::watch_for_changes(config_path, config.clone(), CONFIG_POLL_INTERVAL, ctx.clone()));

    let api_port = config.read().await.api.port;
    let api_addr: SocketAddr = format!("0.0.0.0:{api_port}").parse()?;
    let api_task = tokio::spawn(crate::scanner::api::serve(api_addr, violations, readiness, ctx.clone()));

    let metrics_cfg = config.read().await.metrics.clone();
    let metrics_task = if metrics_cfg.enabled {
        let addr: SocketAddr = format!("0.0.0.0:{}", metrics_cfg.port).parse()?;
        Some(tokio::spawn(metrics::serve(addr, metrics_cfg.path, ctx.clone())))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    ctx.cancel();

    manager.stop_all().await;
    let _ = scanner_task.await;
    watch_task.abort();
    api_task.abort();
    if let Some(task) = metrics_task {
        task.abort();
    }

    Ok(())
}
