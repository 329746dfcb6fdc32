//! Named watcher callbacks and the registry the popup rules resolve against.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::adb::device::Device;
use crate::app::config::PopupRule;
use crate::app::error::AppError;
use crate::app::services::record_store::banned_update;
use crate::app::state::{WatchContext, CAUSE_SOMETHING_WRONG, CAUSE_SUSPENDED};
use crate::app::ui::catalog::{Loc, XpathCatalog};
use crate::app::ui::engine::ElementInfo;
use crate::app::ui::hierarchy::UiTree;
use crate::app::ui::xpath;

pub const SUSPENDED_ACCOUNT: &str = "suspended_account";
pub const PHOTO_REMOVED: &str = "photo_removed";
pub const SOMETHING_WENT_WRONG: &str = "something_went_wrong";

/// Everything a callback may touch when its trigger matched.
pub struct Matched<'a> {
    pub rule: &'a str,
    pub element: &'a ElementInfo,
    pub tree: &'a UiTree,
    pub device: &'a dyn Device,
    pub catalog: &'a XpathCatalog,
    pub context: &'a WatchContext,
}

impl Matched<'_> {
    /// Clicks the first visible node matching a catalog locator on the matched screen.
    pub fn click_loc(&self, loc: Loc) -> Result<bool, AppError> {
        let selector = xpath::compile(self.catalog.get(loc))
            .map_err(|err| AppError::config(err, &self.context.trace_id))?;
        let target = selector
            .select(self.tree)
            .into_iter()
            .filter_map(|id| self.tree.node(id).bounds)
            .find(|bounds| !bounds.is_empty());
        match target {
            Some(bounds) => {
                self.device.click(bounds.center())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Must return quickly: short clicks and record-store updates only.
pub type Callback = Arc<dyn Fn(&Matched<'_>) -> Result<(), AppError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Callback>,
}

impl CallbackRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(SUSPENDED_ACCOUNT, suspended_account);
        registry.register(PHOTO_REMOVED, photo_removed);
        registry.register(SOMETHING_WENT_WRONG, something_went_wrong);
        registry
    }

    pub fn register<F>(&mut self, name: &str, callback: F)
    where
        F: Fn(&Matched<'_>) -> Result<(), AppError> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.to_string(), Arc::new(callback));
    }

    pub fn get(&self, name: &str) -> Option<Callback> {
        self.callbacks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.callbacks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Rejects rules that reference a callback nobody registered.
    pub fn check_rules(&self, rules: &[PopupRule]) -> Result<(), AppError> {
        for rule in rules {
            if let Some(name) = &rule.callback {
                if !self.contains(name) {
                    return Err(AppError::config(
                        format!(
                            "Popup rule {} references unknown callback {name} (known: {})",
                            rule.name,
                            self.names().join(", ")
                        ),
                        "",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Marks the account banned, stops the app and aborts the run. Runs once per run.
pub fn suspended_account(matched: &Matched<'_>) -> Result<(), AppError> {
    let ctx = matched.context;
    if !ctx.first_time(SUSPENDED_ACCOUNT) {
        return Ok(());
    }
    warn!(
        trace_id = %ctx.trace_id,
        username = %ctx.username,
        rule = %matched.rule,
        "🚫 account suspension screen detected"
    );
    let account_id = if ctx.account_record_id.is_empty() {
        &ctx.record_id
    } else {
        &ctx.account_record_id
    };
    match (&ctx.account_store, account_id.is_empty()) {
        (Some(store), false) => match store.update(account_id, &banned_update()) {
            Ok(true) => info!(trace_id = %ctx.trace_id, record_id = %account_id, "account marked Banned"),
            Ok(false) => warn!(trace_id = %ctx.trace_id, record_id = %account_id, "⚠️ ban status update was rejected"),
            Err(err) => error!(trace_id = %ctx.trace_id, error = %err, "❌ failed to record ban"),
        },
        _ => warn!(trace_id = %ctx.trace_id, "⚠️ no account record in context; ban not persisted"),
    }
    if let Err(err) = matched.device.app_stop(&ctx.package) {
        warn!(trace_id = %ctx.trace_id, error = %err, "⚠️ failed to stop app after suspension");
    }
    ctx.cancel.trip(CAUSE_SUSPENDED);
    Ok(())
}

/// Dismisses the removed-content notice.
pub fn photo_removed(matched: &Matched<'_>) -> Result<(), AppError> {
    let ctx = matched.context;
    info!(trace_id = %ctx.trace_id, text = %matched.element.text, "content removal notice");
    if !matched.click_loc(Loc::DialogOk)? {
        matched.device.press_key(crate::app::adb::device::KEY_BACK)?;
    }
    Ok(())
}

/// Aborts the run and sends the current post back for rotation. Runs once per run.
pub fn something_went_wrong(matched: &Matched<'_>) -> Result<(), AppError> {
    let ctx = matched.context;
    if !ctx.first_time(SOMETHING_WENT_WRONG) {
        return Ok(());
    }
    error!(trace_id = %ctx.trace_id, record_id = %ctx.record_id, "❌ critical error toast");
    ctx.cancel.trip(CAUSE_SOMETHING_WRONG);
    if let (Some(store), false) = (&ctx.record_store, ctx.record_id.is_empty()) {
        if let Err(err) = store.mark_something_wrong_and_rotate(&ctx.record_id) {
            error!(trace_id = %ctx.trace_id, error = %err, "❌ failed to rotate record");
        }
    }
    Ok(())
}
