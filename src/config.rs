//! YAML configuration, loaded once at startup and kept live behind a
//! `RwLock<Arc<Config>>` pointer swap so the scanner's hot-reload can
//! observe a new rule set atomically — readers never see a half-updated
//! config, since a reader just clones the `Arc` under a brief read lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::RawDetectionRules;
use crate::plugin::PluginConfig;
use crate::secure_value;

fn default_true() -> bool {
    true
}

fn default_label_data() -> BTreeMap<String, String> {
    BTreeMap::from([("clawcloud.run/status".to_string(), "locked".to_string())])
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerSection {
    pub proc_path: String,
    pub scan_interval_second: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_label_data")]
    pub data: BTreeMap<String, String>,
}

impl Default for LabelSection {
    fn default() -> Self {
        Self { enabled: true, data: default_label_data() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationSection {
    /// Raw form, possibly `${VAR}` or `ENC(...)`; resolve via
    /// [`secure_value::resolve`] before use.
    pub lark_webhook: Option<String>,
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
    #[serde(default = "default_metrics_timeout_second")]
    pub read_timeout_second: u64,
    #[serde(default = "default_metrics_timeout_second")]
    pub write_timeout_second: u64,
    #[serde(default)]
    pub retry_max_attempts: u32,
}

fn default_metrics_port() -> u16 {
    9090
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}
fn default_metrics_timeout_second() -> u64 {
    5
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { enabled: true, port: default_metrics_port(), path: default_metrics_path(), read_timeout_second: 5, write_timeout_second: 5, retry_max_attempts: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    8081
}

impl Default for ApiSection {
    fn default() -> Self {
        Self { enabled: true, port: default_api_port() }
    }
}

fn default_database_url() -> String {
    "sqlite://complik.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scanner: ScannerSection,
    #[serde(default)]
    pub label: LabelSection,
    #[serde(default)]
    pub notifications: NotificationSection,
    #[serde(default)]
    pub detection_rules: RawDetectionRules,
    #[serde(default)]
    pub metrics: MetricsSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
}

impl Config {
    pub fn load_from_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::load_from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Resolves the notification webhook URL through the secure-value
    /// resolver; `None` if no webhook is configured.
    pub fn resolved_lark_webhook(&self) -> Option<Result<String, secure_value::SecureValueError>> {
        self.notifications.lark_webhook.as_deref().map(secure_value::resolve)
    }
}

/// Watches a config file's mtime on a fixed interval and swaps `slot` to a
/// freshly-parsed `Config` whenever it changes. A bad reload is logged and
/// the previous config is kept — the watcher never tears down the running
/// system over a config file that failed to parse.
pub async fn watch_for_changes(path: PathBuf, slot: Arc<RwLock<Arc<Config>>>, poll_interval: std::time::Duration, ctx: tokio_util::sync::CancellationToken) {
    let mut last_modified = file_mtime(&path).await;
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,
            _ = ticker.tick() => {
                let modified = file_mtime(&path).await;
                if modified == last_modified {
                    continue;
                }
                last_modified = modified;

                match Config::load_from_file(&path).await {
                    Ok(new_config) => {
                        *slot.write().await = Arc::new(new_config);
                        info!(path = %path.display(), "config reloaded");
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "config reload failed, keeping the previous config");
                    }
                }
            }
        }
    }
}

async fn file_mtime(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}
