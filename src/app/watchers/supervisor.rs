//! Background popup supervisor: one worker thread evaluating every rule per tick.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::app::adb::device::Device;
use crate::app::config::{validate_popup_rules, PopupRule};
use crate::app::error::AppError;
use crate::app::state::WatchContext;
use crate::app::ui::catalog::XpathCatalog;
use crate::app::ui::engine::ElementInfo;
use crate::app::ui::hierarchy::{NodeId, UiTree};
use crate::app::ui::xpath::{self, Selector};
use crate::app::watchers::rules::{Callback, CallbackRegistry, Matched};

const JOIN_DEADLINE: Duration = Duration::from_secs(3);

enum RuleAction {
    Click(Selector),
    Callback(String, Callback),
}

struct CompiledRule {
    name: String,
    trigger: Selector,
    action: RuleAction,
}

/// State shared between the supervisor handle and its worker.
struct WatcherCore {
    device: Arc<dyn Device>,
    catalog: Arc<XpathCatalog>,
    rules: Vec<CompiledRule>,
    context: WatchContext,
    armed: AtomicBool,
    fired: Mutex<HashMap<String, u32>>,
}

impl WatcherCore {
    fn first_hit(&self, tree: &UiTree, selector: &Selector) -> Option<NodeId> {
        selector.select(tree).into_iter().next()
    }

    /// One pass over the rules against a single dump; returns the names that fired.
    fn tick(&self) -> Vec<String> {
        let trace_id = &self.context.trace_id;
        let xml = match self.device.dump_hierarchy() {
            Ok(xml) => xml,
            Err(err) => {
                if err.is_device_failure() {
                    warn!(trace_id = %trace_id, error = %err, "⚠️ watcher dump failed");
                } else {
                    debug!(trace_id = %trace_id, error = %err, "watcher dump failed");
                }
                return Vec::new();
            }
        };
        let tree = match UiTree::parse(&xml) {
            Ok(tree) => tree,
            Err(err) => {
                debug!(trace_id = %trace_id, error = %err, "watcher could not parse dump");
                return Vec::new();
            }
        };
        let mut fired = Vec::new();
        for rule in &self.rules {
            if !self.armed.load(Ordering::SeqCst) {
                break;
            }
            let Some(hit) = self.first_hit(&tree, &rule.trigger) else {
                continue;
            };
            if self.run_action(rule, &tree, hit) {
                fired.push(rule.name.clone());
                if let Ok(mut counts) = self.fired.lock() {
                    *counts.entry(rule.name.clone()).or_insert(0) += 1;
                }
            }
        }
        fired
    }

    fn run_action(&self, rule: &CompiledRule, tree: &UiTree, hit: NodeId) -> bool {
        let trace_id = &self.context.trace_id;
        match &rule.action {
            RuleAction::Click(button) => {
                let target = button
                    .select(tree)
                    .into_iter()
                    .filter_map(|id| tree.node(id).bounds)
                    .find(|bounds| !bounds.is_empty());
                let Some(bounds) = target else {
                    debug!(trace_id = %trace_id, rule = %rule.name, "trigger seen but dismiss button absent");
                    return false;
                };
                match self.device.click(bounds.center()) {
                    Ok(()) => {
                        info!(trace_id = %trace_id, rule = %rule.name, "popup dismissed");
                        true
                    }
                    Err(err) => {
                        warn!(trace_id = %trace_id, rule = %rule.name, error = %err, "⚠️ popup dismiss click failed");
                        false
                    }
                }
            }
            RuleAction::Callback(name, callback) => {
                let node = tree.node(hit);
                let element = ElementInfo {
                    text: node.text().to_string(),
                    content_desc: node.content_desc().to_string(),
                    resource_id: node.resource_id().to_string(),
                    class_name: node.class_name().to_string(),
                    bounds: node.bounds.unwrap_or_default(),
                    selected: node.selected(),
                    clickable: node.clickable(),
                };
                let matched = Matched {
                    rule: &rule.name,
                    element: &element,
                    tree,
                    device: self.device.as_ref(),
                    catalog: &self.catalog,
                    context: &self.context,
                };
                match panic::catch_unwind(AssertUnwindSafe(|| callback(&matched))) {
                    Ok(Ok(())) => {
                        debug!(trace_id = %trace_id, rule = %rule.name, callback = %name, "callback ran");
                        true
                    }
                    Ok(Err(err)) => {
                        error!(trace_id = %trace_id, rule = %rule.name, callback = %name, error = %err, "❌ watcher callback failed");
                        false
                    }
                    Err(_) => {
                        error!(trace_id = %trace_id, rule = %rule.name, callback = %name, "❌ watcher callback panicked");
                        false
                    }
                }
            }
        }
    }
}

struct Worker {
    stop_tx: Sender<()>,
    done_rx: mpsc::Receiver<()>,
    join: JoinHandle<()>,
}

pub struct PopupSupervisor {
    device: Arc<dyn Device>,
    catalog: Arc<XpathCatalog>,
    rules: Vec<PopupRule>,
    registry: CallbackRegistry,
    tick: Duration,
    context: Option<WatchContext>,
    core: Option<Arc<WatcherCore>>,
    worker: Option<Worker>,
}

impl PopupSupervisor {
    /// Validates the rule list and resolves callback names up front.
    pub fn new(
        device: Arc<dyn Device>,
        catalog: Arc<XpathCatalog>,
        rules: Vec<PopupRule>,
        registry: CallbackRegistry,
        tick: Duration,
    ) -> Result<Self, AppError> {
        validate_popup_rules(&rules)?;
        registry.check_rules(&rules)?;
        Ok(Self {
            device,
            catalog,
            rules,
            registry,
            tick: tick.max(Duration::from_millis(1)),
            context: None,
            core: None,
            worker: None,
        })
    }

    pub fn set_context(&mut self, context: WatchContext) {
        self.context = Some(context);
    }

    fn compile(&self) -> Result<Vec<CompiledRule>, AppError> {
        self.rules
            .iter()
            .map(|rule| {
                let trigger = xpath::compile(&rule.text_xpath)
                    .map_err(|err| AppError::config(format!("Popup rule {}: {err}", rule.name), ""))?;
                let action = match (&rule.button_xpath, &rule.callback) {
                    (Some(button), _) => RuleAction::Click(
                        xpath::compile(button)
                            .map_err(|err| AppError::config(format!("Popup rule {}: {err}", rule.name), ""))?,
                    ),
                    (None, Some(name)) => {
                        let callback = self.registry.get(name).ok_or_else(|| {
                            AppError::config(format!("Unknown callback {name}"), "")
                        })?;
                        RuleAction::Callback(name.clone(), callback)
                    }
                    (None, None) => {
                        return Err(AppError::config(
                            format!("Popup rule {} has no action", rule.name),
                            "",
                        ))
                    }
                };
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    trigger,
                    action,
                })
            })
            .collect()
    }

    /// Installs the rules and spawns the worker. A second call while running is a no-op.
    pub fn register_and_start_watchers(&mut self) -> Result<(), AppError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let context = self
            .context
            .clone()
            .ok_or_else(|| AppError::validation("Watcher context must be set before start", ""))?;
        let core = Arc::new(WatcherCore {
            device: self.device.clone(),
            catalog: self.catalog.clone(),
            rules: self.compile()?,
            context,
            armed: AtomicBool::new(true),
            fired: Mutex::new(HashMap::new()),
        });
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let tick = self.tick;
        let worker_core = Arc::clone(&core);
        let join = thread::Builder::new()
            .name("popup-supervisor".to_string())
            .spawn(move || {
                loop {
                    if !worker_core.armed.load(Ordering::SeqCst) {
                        break;
                    }
                    worker_core.tick();
                    match stop_rx.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let _ = done_tx.send(());
            })
            .map_err(|err| AppError::system(format!("Failed to spawn watcher thread: {err}"), ""))?;
        info!(
            trace_id = %core.context.trace_id,
            rules = core.rules.len(),
            tick_ms = tick.as_millis() as u64,
            "watchers armed"
        );
        self.core = Some(core);
        self.worker = Some(Worker {
            stop_tx,
            done_rx,
            join,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Signals the worker, joins within a short deadline and disarms every rule. Idempotent.
    pub fn stop_watchers(&mut self) {
        if let Some(core) = &self.core {
            core.armed.store(false, Ordering::SeqCst);
        }
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.stop_tx.send(());
        match worker.done_rx.recv_timeout(JOIN_DEADLINE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.join.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("⚠️ watcher thread did not stop within deadline; detaching");
            }
        }
        if let Some(core) = &self.core {
            debug!(trace_id = %core.context.trace_id, "watchers stopped");
        }
    }

    /// Runs one evaluation pass on the calling thread.
    pub fn tick_once(&mut self) -> Result<Vec<String>, AppError> {
        if self.core.is_none() {
            let context = self
                .context
                .clone()
                .ok_or_else(|| AppError::validation("Watcher context must be set before tick", ""))?;
            self.core = Some(Arc::new(WatcherCore {
                device: self.device.clone(),
                catalog: self.catalog.clone(),
                rules: self.compile()?,
                context,
                armed: AtomicBool::new(true),
                fired: Mutex::new(HashMap::new()),
            }));
        }
        Ok(self.core.as_ref().map(|core| core.tick()).unwrap_or_default())
    }

    /// Per-rule fire counts of the current arming.
    pub fn fired_counts(&self) -> HashMap<String, u32> {
        self.core
            .as_ref()
            .and_then(|core| core.fired.lock().ok().map(|counts| counts.clone()))
            .unwrap_or_default()
    }
}

impl Drop for PopupSupervisor {
    fn drop(&mut self) {
        self.stop_watchers();
    }
}
