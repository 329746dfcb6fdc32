use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::adb::device::Device;
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::ui::catalog::{Loc, XpathCatalog};
use crate::app::ui::engine::UiEngine;

const CONFIRM_ROUNDS: usize = 3;

/// Resets app-level identity between accounts.
pub trait IdentityResetter: Send + Sync {
    /// `Ok(false)` when the helper notification was not present.
    fn reset(&self, device: &Arc<dyn Device>) -> Result<bool, AppError>;
}

/// Taps the helper app's "generate a new identity" notification through its confirmations.
pub struct NotificationIdentityResetter {
    catalog: Arc<XpathCatalog>,
    config: AppConfig,
    trace_id: String,
}

impl NotificationIdentityResetter {
    pub fn new(identity_package: &str, config: &AppConfig, trace_id: &str) -> Self {
        Self {
            catalog: Arc::new(XpathCatalog::for_package(identity_package)),
            config: config.clone(),
            trace_id: trace_id.to_string(),
        }
    }
}

impl IdentityResetter for NotificationIdentityResetter {
    fn reset(&self, device: &Arc<dyn Device>) -> Result<bool, AppError> {
        let engine = UiEngine::new(device.clone(), self.catalog.clone(), &self.config, &self.trace_id)?;
        device.shell(&["cmd", "statusbar", "expand-notifications"])?;
        let notification = engine.loc(Loc::NotificationIdentity).to_string();
        if !engine.click_by_locator(&notification, Duration::from_secs(10)) {
            warn!(trace_id = %self.trace_id, "⚠️ identity notification not found");
            let _ = device.shell(&["cmd", "statusbar", "collapse"]);
            return Ok(false);
        }
        let confirm = engine.loc(Loc::IdentityConfirm).to_string();
        let allow = engine.loc(Loc::PermissionAllow).to_string();
        for _ in 0..CONFIRM_ROUNDS {
            let clicked = engine.click_if_exists(&allow, Duration::from_secs(2))
                || engine.click_if_exists(&confirm, Duration::from_secs(3));
            if !clicked {
                break;
            }
            engine.pacer().sleep(Duration::from_secs(1));
        }
        let _ = device.shell(&["cmd", "statusbar", "collapse"]);
        info!(trace_id = %self.trace_id, "identity reset requested");
        Ok(true)
    }
}
