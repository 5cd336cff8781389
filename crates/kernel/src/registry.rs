//! The plugin registry.
//!
//! Owns every plugin instance, resolves the load order (topological over
//! dependencies, priority then id as tie-breaker), drives the lifecycle and
//! dispatches the hook chain. Mutated only before `start_all`; afterwards
//! all access is read-only.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use cb_domain::config::Config;
use cb_domain::{Error, Result};

use crate::hooks::{CtxKey, Hook, HookContext};
use crate::meta::Capability;
use crate::plugin::Plugin;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kernel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct Kernel {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    /// Plugin ids in resolved start order. Set by `configure_all`.
    load_order: RwLock<Vec<String>>,
    started: RwLock<bool>,
}

/// Summary row for `list_plugins`.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub id: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub dependencies: Vec<String>,
    pub priority: i32,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register a plugin instance. Fails on a duplicate or empty id, or
    /// after `start_all`.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        if *self.started.read() {
            return Err(Error::Other(
                "cannot register plugins after start_all".into(),
            ));
        }

        let id = plugin.meta().id;
        if id.is_empty() {
            return Err(Error::Config("plugin id must not be empty".into()));
        }

        let mut plugins = self.plugins.write();
        if plugins.contains_key(id) {
            return Err(Error::DuplicateId(id.to_owned()));
        }
        plugins.insert(id.to_owned(), plugin);
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Resolve the load order, verify dependencies and configure every
    /// plugin with the full config. Any failure is fatal.
    pub fn configure_all(&self, config: &Config) -> Result<()> {
        let order = {
            let plugins = self.plugins.read();
            resolve_load_order(&plugins)?
        };
        *self.load_order.write() = order.clone();

        for id in &order {
            let plugin = self.get(id).ok_or_else(|| {
                Error::Other(format!("plugin '{id}' vanished during configure"))
            })?;
            plugin.configure(config).map_err(|e| {
                Error::Config(format!("configuring '{id}': {e}"))
            })?;
        }

        tracing::debug!(order = ?order, "plugin load order resolved");
        Ok(())
    }

    /// Start every plugin in load order. Idempotent; a start failure is
    /// fatal and leaves already-started plugins for `stop_all` to unwind
    /// (the started flag flips before the first `start` call so that
    /// unwind runs even after a partial start).
    pub async fn start_all(self: &Arc<Self>) -> Result<()> {
        {
            let mut started = self.started.write();
            if *started {
                return Ok(());
            }
            *started = true;
        }

        let order = self.load_order.read().clone();
        for id in &order {
            let plugin = match self.get(id) {
                Some(p) => p,
                None => continue,
            };
            plugin.start(self).await.map_err(|e| {
                Error::Other(format!("start failed for '{id}': {e}"))
            })?;
            tracing::info!(plugin = %id, "plugin started");
        }

        Ok(())
    }

    /// Stop every plugin in reverse load order. Idempotent; stop errors
    /// are logged, never propagated, so every plugin gets its turn.
    pub async fn stop_all(&self) {
        if !*self.started.read() {
            return;
        }

        let order = self.load_order.read().clone();
        for id in order.iter().rev() {
            let plugin = match self.get(id) {
                Some(p) => p,
                None => continue,
            };
            if let Err(e) = plugin.stop().await {
                tracing::warn!(plugin = %id, error = %e, "plugin stop failed");
            } else {
                tracing::info!(plugin = %id, "plugin stopped");
            }
        }

        *self.started.write() = false;
    }

    pub fn is_started(&self) -> bool {
        *self.started.read()
    }

    // ── Lookup ─────────────────────────────────────────────────────

    /// Exact lookup by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().get(id).cloned()
    }

    /// First plugin carrying `tag`, in load order.
    pub fn get_by_capability(&self, tag: Capability) -> Option<Arc<dyn Plugin>> {
        let plugins = self.plugins.read();
        for id in self.load_order.read().iter() {
            if let Some(plugin) = plugins.get(id) {
                if plugin.meta().has_capability(tag) {
                    return Some(plugin.clone());
                }
            }
        }
        None
    }

    /// Every plugin implementing `point`, in load order.
    pub fn get_implementations(&self, point: &str) -> Vec<(String, Arc<dyn Plugin>)> {
        let plugins = self.plugins.read();
        self.load_order
            .read()
            .iter()
            .filter_map(|id| {
                let plugin = plugins.get(id)?;
                plugin
                    .meta()
                    .implements_point(point)
                    .then(|| (id.clone(), plugin.clone()))
            })
            .collect()
    }

    /// All registered plugins in load order.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        let plugins = self.plugins.read();
        self.load_order
            .read()
            .iter()
            .filter_map(|id| {
                let meta = plugins.get(id)?.meta();
                Some(PluginInfo {
                    id: meta.id.to_owned(),
                    version: meta.version.to_owned(),
                    capabilities: meta.capabilities.iter().map(|c| c.to_string()).collect(),
                    dependencies: meta.dependencies.iter().map(|d| (*d).to_owned()).collect(),
                    priority: meta.priority,
                })
            })
            .collect()
    }

    // ── Hook chain ─────────────────────────────────────────────────

    /// Run a hook on every plugin that declares it, in load order.
    ///
    /// Each participant mutates the context in place. Once `ctx.abort` is
    /// set the chain stops and no further plugin sees the context. A
    /// failing hook is logged and absorbed; after the chain, a synthetic
    /// `on_error` dispatch runs for each failure — except when the failing
    /// hook *is* `on_error`, which is never re-entered.
    pub async fn run_hook(&self, hook: Hook, ctx: &mut HookContext) {
        let failures = self.dispatch_hook(hook, ctx).await;

        if hook == Hook::Error {
            return;
        }
        for (plugin_id, error) in failures {
            let mut error_ctx = HookContext::new()
                .with(CtxKey::ErrorMessage, error)
                .with(CtxKey::HookName, hook.as_str())
                .with(CtxKey::PluginId, plugin_id);
            let _ = self.dispatch_hook(Hook::Error, &mut error_ctx).await;
        }
    }

    /// Single pass over the chain. Returns `(plugin_id, error)` pairs for
    /// absorbed failures.
    async fn dispatch_hook(
        &self,
        hook: Hook,
        ctx: &mut HookContext,
    ) -> Vec<(String, String)> {
        let mut failures = Vec::new();

        let order = self.load_order.read().clone();
        for id in &order {
            let plugin = match self.get(id) {
                Some(p) => p,
                None => continue,
            };
            if !plugin.hooks().contains(&hook) {
                continue;
            }

            if let Err(e) = plugin.on_hook(hook, ctx).await {
                tracing::warn!(
                    plugin = %id,
                    hook = %hook,
                    error = %e,
                    "hook failed; chain continues"
                );
                failures.push((id.clone(), e.to_string()));
                continue;
            }

            if ctx.abort {
                tracing::debug!(plugin = %id, hook = %hook, "hook chain aborted");
                break;
            }
        }

        failures
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Load-order resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Topological sort over `dependencies`, with `(priority, id)` deciding
/// among plugins whose dependencies are satisfied.
fn resolve_load_order(plugins: &HashMap<String, Arc<dyn Plugin>>) -> Result<Vec<String>> {
    // Verify every dependency resolves before ordering.
    for (id, plugin) in plugins.iter() {
        for dep in plugin.meta().dependencies {
            if !plugins.contains_key(*dep) {
                return Err(Error::Dependency {
                    plugin: id.clone(),
                    missing: (*dep).to_owned(),
                });
            }
        }
    }

    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, plugin) in plugins.iter() {
        indegree.entry(id.as_str()).or_insert(0);
        for dep in plugin.meta().dependencies {
            *indegree.entry(id.as_str()).or_insert(0) += 1;
            dependents.entry(dep).or_default().push(id.as_str());
        }
    }

    // Ready set ordered by (priority, id).
    let mut ready: BTreeSet<(i32, &str)> = indegree
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| (plugins[*id].meta().priority, *id))
        .collect();

    let mut order = Vec::with_capacity(plugins.len());
    while let Some(&(priority, id)) = ready.iter().next() {
        ready.remove(&(priority, id));
        order.push(id.to_owned());

        if let Some(deps) = dependents.get(id) {
            for dependent in deps {
                let n = indegree
                    .get_mut(dependent)
                    .expect("dependent tracked in indegree");
                *n -= 1;
                if *n == 0 {
                    ready.insert((plugins[*dependent].meta().priority, *dependent));
                }
            }
        }
    }

    if order.len() != plugins.len() {
        let stuck: Vec<&str> = indegree
            .keys()
            .filter(|id| !order.iter().any(|o| o.as_str() == **id))
            .copied()
            .collect();
        return Err(Error::Config(format!(
            "dependency cycle among plugins: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::PluginMeta;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records lifecycle and hook activity for assertions.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    struct TestPlugin {
        meta: PluginMeta,
        recorder: Arc<Recorder>,
        hooks: &'static [Hook],
        /// When true, `on_hook` sets abort.
        abort_on_hook: bool,
        /// When true, `on_hook` fails.
        fail_on_hook: bool,
    }

    impl TestPlugin {
        fn new(meta: PluginMeta, recorder: Arc<Recorder>) -> Self {
            Self {
                meta,
                recorder,
                hooks: &[],
                abort_on_hook: false,
                fail_on_hook: false,
            }
        }

        fn with_hooks(mut self, hooks: &'static [Hook]) -> Self {
            self.hooks = hooks;
            self
        }

        fn aborting(mut self) -> Self {
            self.abort_on_hook = true;
            self
        }

        fn failing(mut self) -> Self {
            self.fail_on_hook = true;
            self
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn meta(&self) -> &PluginMeta {
            &self.meta
        }

        async fn start(&self, _kernel: &Arc<Kernel>) -> Result<()> {
            self.recorder.push(format!("start:{}", self.meta.id));
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.recorder.push(format!("stop:{}", self.meta.id));
            Ok(())
        }

        fn hooks(&self) -> &'static [Hook] {
            self.hooks
        }

        async fn on_hook(&self, hook: Hook, ctx: &mut HookContext) -> Result<()> {
            self.recorder
                .push(format!("{}:{}", hook.as_str(), self.meta.id));
            if self.fail_on_hook && hook != Hook::Error {
                return Err(Error::Other("boom".into()));
            }
            if self.abort_on_hook {
                ctx.abort = true;
            }
            Ok(())
        }
    }

    async fn build(
        plugins: Vec<TestPlugin>,
    ) -> (Arc<Kernel>, Arc<Recorder>) {
        let recorder = plugins
            .first()
            .map(|p| p.recorder.clone())
            .unwrap_or_default();
        let kernel = Arc::new(Kernel::new());
        for plugin in plugins {
            kernel.register(Arc::new(plugin)).unwrap();
        }
        kernel.configure_all(&Config::default()).unwrap();
        kernel.start_all().await.unwrap();
        (kernel, recorder)
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let kernel = Kernel::new();
        kernel
            .register(Arc::new(TestPlugin::new(
                PluginMeta::new("dup", "1.0.0"),
                recorder.clone(),
            )))
            .unwrap();
        let err = kernel
            .register(Arc::new(TestPlugin::new(
                PluginMeta::new("dup", "1.0.0"),
                recorder,
            )))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId(id) if id == "dup"));
    }

    #[test]
    fn missing_dependency_is_fatal() {
        let recorder = Arc::new(Recorder::default());
        let kernel = Kernel::new();
        kernel
            .register(Arc::new(TestPlugin::new(
                PluginMeta::new("needy", "1.0.0").with_dependencies(&["ghost"]),
                recorder,
            )))
            .unwrap();
        let err = kernel.configure_all(&Config::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::Dependency { plugin, missing }
                if plugin == "needy" && missing == "ghost"
        ));
    }

    #[tokio::test]
    async fn start_order_respects_dependencies_and_priority() {
        let recorder = Arc::new(Recorder::default());
        // c (prio 1) depends on a (prio 90): a must still start first.
        // b (prio 10) has no deps and beats a on priority.
        let plugins = vec![
            TestPlugin::new(
                PluginMeta::new("a", "1.0.0").with_priority(90),
                recorder.clone(),
            ),
            TestPlugin::new(
                PluginMeta::new("b", "1.0.0").with_priority(10),
                recorder.clone(),
            ),
            TestPlugin::new(
                PluginMeta::new("c", "1.0.0")
                    .with_priority(1)
                    .with_dependencies(&["a"]),
                recorder.clone(),
            ),
        ];
        let (kernel, recorder) = build(plugins).await;

        assert_eq!(recorder.events(), vec!["start:b", "start:a", "start:c"]);

        kernel.stop_all().await;
        assert_eq!(
            recorder.events()[3..],
            ["stop:c", "stop:a", "stop:b"]
        );
    }

    #[tokio::test]
    async fn priority_ties_break_by_id() {
        let recorder = Arc::new(Recorder::default());
        let plugins = vec![
            TestPlugin::new(
                PluginMeta::new("zeta", "1.0.0").with_priority(5),
                recorder.clone(),
            ),
            TestPlugin::new(
                PluginMeta::new("alpha", "1.0.0").with_priority(5),
                recorder.clone(),
            ),
        ];
        let (_kernel, recorder) = build(plugins).await;
        assert_eq!(recorder.events(), vec!["start:alpha", "start:zeta"]);
    }

    #[tokio::test]
    async fn start_all_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let (kernel, recorder) = build(vec![TestPlugin::new(
            PluginMeta::new("solo", "1.0.0"),
            recorder,
        )])
        .await;
        kernel.start_all().await.unwrap();
        assert_eq!(recorder.events(), vec!["start:solo"]);
    }

    #[tokio::test]
    async fn hooks_run_in_load_order_and_abort_short_circuits() {
        let recorder = Arc::new(Recorder::default());
        let plugins = vec![
            TestPlugin::new(
                PluginMeta::new("first", "1.0.0").with_priority(1),
                recorder.clone(),
            )
            .with_hooks(&[Hook::MessageReceived]),
            TestPlugin::new(
                PluginMeta::new("second", "1.0.0").with_priority(2),
                recorder.clone(),
            )
            .with_hooks(&[Hook::MessageReceived])
            .aborting(),
            TestPlugin::new(
                PluginMeta::new("third", "1.0.0").with_priority(3),
                recorder.clone(),
            )
            .with_hooks(&[Hook::MessageReceived]),
        ];
        let (kernel, recorder) = build(plugins).await;

        let mut ctx = HookContext::new();
        kernel.run_hook(Hook::MessageReceived, &mut ctx).await;

        assert!(ctx.abort);
        let hook_events: Vec<_> = recorder
            .events()
            .into_iter()
            .filter(|e| e.starts_with("on_message_received"))
            .collect();
        assert_eq!(
            hook_events,
            vec!["on_message_received:first", "on_message_received:second"]
        );
    }

    #[tokio::test]
    async fn non_participants_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let plugins = vec![
            TestPlugin::new(PluginMeta::new("mute", "1.0.0"), recorder.clone()),
            TestPlugin::new(PluginMeta::new("loud", "1.0.0"), recorder.clone())
                .with_hooks(&[Hook::BeforeSend]),
        ];
        let (kernel, recorder) = build(plugins).await;

        let mut ctx = HookContext::new();
        kernel.run_hook(Hook::BeforeSend, &mut ctx).await;

        let hook_events: Vec<_> = recorder
            .events()
            .into_iter()
            .filter(|e| e.starts_with("on_before_send"))
            .collect();
        assert_eq!(hook_events, vec!["on_before_send:loud"]);
    }

    #[tokio::test]
    async fn run_hook_without_implementers_leaves_ctx_unchanged() {
        let recorder = Arc::new(Recorder::default());
        let (kernel, _) = build(vec![TestPlugin::new(
            PluginMeta::new("mute", "1.0.0"),
            recorder,
        )])
        .await;

        let mut ctx = HookContext::new().with(CtxKey::Text, "unchanged");
        kernel.run_hook(Hook::TransformResponse, &mut ctx).await;
        assert_eq!(ctx.get_str(CtxKey::Text), Some("unchanged"));
        assert!(!ctx.abort);
    }

    #[tokio::test]
    async fn hook_errors_are_absorbed_and_reported_via_on_error() {
        let recorder = Arc::new(Recorder::default());
        let plugins = vec![
            TestPlugin::new(
                PluginMeta::new("bad", "1.0.0").with_priority(1),
                recorder.clone(),
            )
            .with_hooks(&[Hook::MessageReceived])
            .failing(),
            TestPlugin::new(
                PluginMeta::new("good", "1.0.0").with_priority(2),
                recorder.clone(),
            )
            .with_hooks(&[Hook::MessageReceived]),
            TestPlugin::new(
                PluginMeta::new("watcher", "1.0.0").with_priority(3),
                recorder.clone(),
            )
            .with_hooks(&[Hook::Error]),
        ];
        let (kernel, recorder) = build(plugins).await;

        let mut ctx = HookContext::new();
        kernel.run_hook(Hook::MessageReceived, &mut ctx).await;

        let events = recorder.events();
        // The chain continued past the failure...
        assert!(events.contains(&"on_message_received:good".to_owned()));
        // ...and the watcher saw the synthetic on_error dispatch.
        assert!(events.contains(&"on_error:watcher".to_owned()));
    }

    #[tokio::test]
    async fn on_error_failures_do_not_recurse() {
        let recorder = Arc::new(Recorder::default());
        let plugins = vec![
            TestPlugin::new(
                PluginMeta::new("bad", "1.0.0").with_priority(1),
                recorder.clone(),
            )
            .with_hooks(&[Hook::MessageReceived])
            .failing(),
            // Fails inside on_error too; must not trigger another round.
            TestPlugin::new(
                PluginMeta::new("flaky-watcher", "1.0.0").with_priority(2),
                recorder.clone(),
            )
            .with_hooks(&[Hook::Error])
            .failing(),
        ];
        let (kernel, recorder) = build(plugins).await;

        let mut ctx = HookContext::new();
        kernel.run_hook(Hook::MessageReceived, &mut ctx).await;

        let error_dispatches = recorder
            .events()
            .iter()
            .filter(|e| e.starts_with("on_error"))
            .count();
        assert_eq!(error_dispatches, 1);
    }

    #[tokio::test]
    async fn capability_and_implementation_lookup() {
        let recorder = Arc::new(Recorder::default());
        let plugins = vec![
            TestPlugin::new(
                PluginMeta::new("brain", "1.0.0")
                    .with_priority(20)
                    .with_capabilities(&[Capability::Llm]),
                recorder.clone(),
            ),
            TestPlugin::new(
                PluginMeta::new("tg", "1.0.0")
                    .with_priority(25)
                    .with_implements(&["session.receive", "session.send"]),
                recorder.clone(),
            ),
            TestPlugin::new(
                PluginMeta::new("drop", "1.0.0")
                    .with_priority(24)
                    .with_implements(&["session.receive"]),
                recorder.clone(),
            ),
        ];
        let (kernel, _) = build(plugins).await;

        assert_eq!(
            kernel.get_by_capability(Capability::Llm).unwrap().meta().id,
            "brain"
        );
        assert!(kernel.get_by_capability(Capability::Wallet).is_none());

        let receivers: Vec<String> = kernel
            .get_implementations("session.receive")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        // Load order: drop (24) before tg (25).
        assert_eq!(receivers, vec!["drop", "tg"]);

        let senders: Vec<String> = kernel
            .get_implementations("session.send")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(senders, vec!["tg"]);
    }
}
