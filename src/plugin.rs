//! Plugin lifecycle: contract, registry of factories, and the manager that
//! drives concurrent start/stop across every loaded plugin.
//!
//! Per the design notes, the factory map is not process-wide mutable state
//! (the source's init-time global registry pattern); it is an explicit
//! `Registry` built at startup, populated by `Registry::register`, and
//! handed to the `Manager` fully formed. This keeps tests hermetic: a test
//! can build a `Registry` with only the fakes it needs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::EventBus;

/// Kind of plugin, used only for logging/introspection — the manager treats
/// all kinds uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Discovery,
    Collector,
    Detector,
    Handler,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PluginKind::Discovery => "discovery",
            PluginKind::Collector => "collector",
            PluginKind::Detector => "detector",
            PluginKind::Handler => "handler",
        };
        f.write_str(s)
    }
}

/// One plugin config entry, as configured under the `plugins:` list.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PluginConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Opaque JSON settings, interpreted by the plugin itself.
    #[serde(default)]
    pub settings: Value,
}

fn default_enabled() -> bool {
    true
}

/// Contract every pipeline plugin implements.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> PluginKind;

    /// Starts the plugin. The plugin owns its background tasks from this
    /// point; `stop` is the only way to ask it to wind them down.
    async fn start(&self, ctx: CancellationToken, settings: Value, bus: Arc<EventBus>) -> anyhow::Result<()>;

    /// Requests the plugin stop. Must return once internal tasks have
    /// settled, or when `ctx` fires, whichever comes first.
    async fn stop(&self, ctx: CancellationToken) -> anyhow::Result<()>;
}

type Factory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Factory registry, built once at startup.
#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`. Re-registering the same name
    /// replaces the previous factory (used by tests to swap in fakes).
    pub fn register(&mut self, name: impl Into<String>, factory: impl Fn() -> Arc<dyn Plugin> + Send + Sync + 'static) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    fn build(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.factories.get(name).map(|f| f())
    }
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    settings: Value,
    ctx: CancellationToken,
}

/// Drives the lifecycle of every loaded plugin.
pub struct Manager {
    registry: Registry,
    bus: Arc<EventBus>,
    loaded: HashMap<String, LoadedPlugin>,
    stop_deadline: Duration,
}

impl Manager {
    pub fn new(registry: Registry, bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            bus,
            loaded: HashMap::new(),
            stop_deadline: Duration::from_secs(20),
        }
    }

    #[cfg(test)]
    fn with_stop_deadline(mut self, deadline: Duration) -> Self {
        self.stop_deadline = deadline;
        self
    }

    /// Looks up `config.name` in the registry and, if found, registers it as
    /// loaded. An unknown name is a warning, never a fatal error. Plugins
    /// already loaded are not reloaded.
    pub fn load_plugin(&mut self, config: &PluginConfig) {
        if self.loaded.contains_key(&config.name) {
            return;
        }
        match self.registry.build(&config.name) {
            Some(plugin) => {
                self.loaded.insert(
                    config.name.clone(),
                    LoadedPlugin {
                        plugin,
                        settings: config.settings.clone(),
                        ctx: CancellationToken::new(),
                    },
                );
            }
            None => {
                warn!(plugin = %config.name, "no factory registered for plugin, skipping");
            }
        }
    }

    pub fn load_all(&mut self, configs: &[PluginConfig]) {
        for config in configs {
            if !config.enabled {
                continue;
            }
            self.load_plugin(config);
        }
    }

    /// Starts every loaded plugin concurrently. Errors from individual
    /// plugins are collected and returned together; one plugin failing to
    /// start never prevents the others from starting.
    pub async fn start_all(&self) -> Result<(), Vec<(String, anyhow::Error)>> {
        let mut futures: Vec<Pin<Box<dyn Future<Output = (String, anyhow::Result<()>)> + Send>>> = Vec::new();

        for (name, loaded) in &self.loaded {
            let name = name.clone();
            let plugin = loaded.plugin.clone();
            let settings = loaded.settings.clone();
            let bus = self.bus.clone();
            let ctx = loaded.ctx.clone();
            futures.push(Box::pin(async move {
                info!(plugin = %name, kind = %plugin.kind(), "starting plugin");
                let result = plugin.start(ctx, settings, bus).await;
                (name, result)
            }));
        }

        let results = futures::future::join_all(futures).await;
        let errors: Vec<(String, anyhow::Error)> = results
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| (name, e)))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Stops every loaded plugin with a shared deadline. Errors, and
    /// plugins that fail to stop within the deadline, are logged and
    /// swallowed: shutdown must finish regardless.
    pub async fn stop_all(&self) {
        let mut futures: Vec<Pin<Box<dyn Future<Output = ()> + Send>>> = Vec::new();

        for (name, loaded) in &self.loaded {
            let name = name.clone();
            let plugin = loaded.plugin.clone();
            let ctx = loaded.ctx.clone();
            let deadline = self.stop_deadline;
            futures.push(Box::pin(async move {
                ctx.cancel();
                match tokio::time::timeout(deadline, plugin.stop(ctx)).await {
                    Ok(Ok(())) => info!(plugin = %name, "plugin stopped"),
                    Ok(Err(err)) => error!(plugin = %name, error = %err, "plugin returned an error while stopping"),
                    Err(_) => error!(plugin = %name, "plugin did not stop within the shared deadline, abandoning"),
                }
            }));
        }

        futures::future::join_all(futures).await;
    }

    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct SlowPlugin {
        name: String,
        start_delay: Duration,
        stop_delay: Duration,
        started: Arc<AtomicBool>,
        fail_start: bool,
    }

    #[async_trait]
    impl Plugin for SlowPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> PluginKind {
            PluginKind::Discovery
        }

        async fn start(&self, _ctx: CancellationToken, _settings: Value, _bus: Arc<EventBus>) -> anyhow::Result<()> {
            tokio::time::sleep(self.start_delay).await;
            if self.fail_start {
                anyhow::bail!("intentional start failure");
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
            tokio::time::sleep(self.stop_delay).await;
            Ok(())
        }
    }

    fn registry_with(plugins: Vec<(&'static str, Duration, Duration, bool)>) -> (Registry, Vec<Arc<AtomicBool>>) {
        let mut registry = Registry::new();
        let mut flags = Vec::new();
        for (name, start_delay, stop_delay, fail_start) in plugins {
            let started = Arc::new(AtomicBool::new(false));
            flags.push(started.clone());
            registry.register(name, move || {
                Arc::new(SlowPlugin {
                    name: name.to_string(),
                    start_delay,
                    stop_delay,
                    started: started.clone(),
                    fail_start,
                }) as Arc<dyn Plugin>
            });
        }
        (registry, flags)
    }

    #[tokio::test]
    async fn unknown_plugin_name_is_skipped_not_fatal() {
        let (registry, _) = registry_with(vec![]);
        let bus = EventBus::new();
        let mut manager = Manager::new(registry, bus);
        manager.load_plugin(&PluginConfig {
            name: "nonexistent".into(),
            kind: "discovery".into(),
            enabled: true,
            settings: Value::Null,
        });
        assert!(manager.loaded_names().is_empty());
    }

    #[tokio::test]
    async fn start_all_runs_concurrently_and_collects_errors() {
        let (registry, flags) = registry_with(vec![
            ("ok-a", Duration::from_millis(20), Duration::ZERO, false),
            ("ok-b", Duration::from_millis(20), Duration::ZERO, false),
            ("bad", Duration::from_millis(5), Duration::ZERO, true),
        ]);
        let bus = EventBus::new();
        let mut manager = Manager::new(registry, bus);
        for name in ["ok-a", "ok-b", "bad"] {
            manager.load_plugin(&PluginConfig {
                name: name.into(),
                kind: "discovery".into(),
                enabled: true,
                settings: Value::Null,
            });
        }

        let start = std::time::Instant::now();
        let result = manager.start_all().await;
        let elapsed = start.elapsed();

        // Concurrent, not sequential: should finish close to the slowest
        // single plugin (20ms), not the sum (45ms).
        assert!(elapsed < Duration::from_millis(40), "elapsed={elapsed:?}");

        let errors = result.expect_err("one plugin was configured to fail");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "bad");

        assert!(flags[0].load(Ordering::SeqCst));
        assert!(flags[1].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_all_abandons_a_plugin_that_exceeds_the_deadline() {
        let (registry, _) = registry_with(vec![("slow-stop", Duration::ZERO, Duration::from_secs(5), false)]);
        let bus = EventBus::new();
        let mut manager = Manager::new(registry, bus).with_stop_deadline(Duration::from_millis(20));
        manager.load_plugin(&PluginConfig {
            name: "slow-stop".into(),
            kind: "discovery".into(),
            enabled: true,
            settings: Value::Null,
        });
        manager.start_all().await.ok();

        let start = std::time::Instant::now();
        manager.stop_all().await;
        // stop_all must return promptly even though the plugin "stop" takes 5s.
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn reloading_a_loaded_plugin_is_a_noop() {
        let (registry, flags) = registry_with(vec![("once", Duration::ZERO, Duration::ZERO, false)]);
        let bus = EventBus::new();
        let mut manager = Manager::new(registry, bus);
        let config = PluginConfig {
            name: "once".into(),
            kind: "discovery".into(),
            enabled: true,
            settings: Value::Null,
        };
        manager.load_plugin(&config);
        manager.load_plugin(&config);
        assert_eq!(manager.loaded_names().len(), 1);
        let _ = flags;
    }
}
