use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::app::adb::device::{Device, KEY_HOME};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::ui::catalog::{Loc, XpathCatalog};
use crate::app::ui::engine::UiEngine;

const IP_CHANGE_TIMEOUT: Duration = Duration::from_secs(60);

pub trait VpnRotator: Send + Sync {
    /// Errors unless the exit IP observably changed.
    fn rotate(&self, device: &Arc<dyn Device>) -> Result<(), AppError>;
}

/// Drives the VPN app's own UI: read IP, reconnect, read IP again.
pub struct UiVpnRotator {
    catalog: Arc<XpathCatalog>,
    config: AppConfig,
    trace_id: String,
}

impl UiVpnRotator {
    pub fn new(vpn_package: &str, config: &AppConfig, trace_id: &str) -> Self {
        Self {
            catalog: Arc::new(XpathCatalog::for_package(vpn_package)),
            config: config.clone(),
            trace_id: trace_id.to_string(),
        }
    }

    fn read_ip(&self, engine: &UiEngine) -> Option<String> {
        engine
            .get_element_text(engine.loc(Loc::VpnIpLabel))
            .map(|text| text.trim_start_matches("IP:").trim().to_string())
            .filter(|ip| !ip.is_empty())
    }
}

impl VpnRotator for UiVpnRotator {
    fn rotate(&self, device: &Arc<dyn Device>) -> Result<(), AppError> {
        let engine = UiEngine::new(device.clone(), self.catalog.clone(), &self.config, &self.trace_id)?;
        let reconnect = engine.loc(Loc::VpnReconnect).to_string();
        let launch = &self.config.launch;
        if !engine.open_app(
            Some(&reconnect),
            Duration::from_secs(launch.readiness_timeout_secs),
            launch.max_retries,
        )? {
            return Err(AppError::dependency(
                format!("VPN app {} did not open", engine.package()),
                &self.trace_id,
            ));
        }
        let before = self.read_ip(&engine);
        if !engine.click_by_locator(&reconnect, Duration::from_secs(10)) {
            return Err(AppError::dependency("VPN reconnect control not clickable", &self.trace_id));
        }
        let connected = engine.loc(Loc::VpnConnected).to_string();
        engine.wait_for_element_appear(&connected, IP_CHANGE_TIMEOUT, None);

        let deadline = engine.pacer().scale(IP_CHANGE_TIMEOUT);
        let started = Instant::now();
        let after = loop {
            let current = self.read_ip(&engine);
            if current.is_some() && current != before {
                break current;
            }
            if started.elapsed() >= deadline {
                break current;
            }
            engine.pacer().sleep(Duration::from_secs(2));
        };
        let _ = device.press_key(KEY_HOME);
        match (before, after) {
            (Some(old), Some(new)) if old != new => {
                info!(trace_id = %self.trace_id, old_ip = %old, new_ip = %new, "✅ VPN rotated");
                Ok(())
            }
            (old, new) => {
                warn!(trace_id = %self.trace_id, old_ip = ?old, new_ip = ?new, "⚠️ VPN identifier unchanged");
                Err(AppError::dependency(
                    format!("VPN IP did not change (before {old:?}, after {new:?})"),
                    &self.trace_id,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{node, screen, text, FakeDevice};

    const VPN: &str = "com.vpn.app";

    fn vpn_screen(ip: &str) -> String {
        screen(VPN, &[
            node(&[("resource-id", "com.vpn.app:id/ip_address"), ("text", ip)], [0, 200, 1080, 300]),
            text("Reconnect", [300, 1800, 780, 1900]),
            text("Connected", [300, 1000, 780, 1100]),
        ])
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.engine.time_scale = 0.0;
        config
    }

    #[test]
    fn rotation_succeeds_when_ip_changes() {
        let device = Arc::new(FakeDevice::new("D1"));
        device
            .add_screen("before", vpn_screen("IP: 10.0.0.1"))
            .add_screen("after", vpn_screen("IP: 10.0.0.2"))
            .on_app_start("blank", "before")
            .on_click("before", "Reconnect", "after");
        let dyn_device: Arc<dyn Device> = device.clone();
        UiVpnRotator::new(VPN, &config(), "t1").rotate(&dyn_device).expect("rotate");
    }

    #[test]
    fn rotation_fails_when_ip_is_unchanged() {
        let device = Arc::new(FakeDevice::new("D1"));
        device.add_screen("before", vpn_screen("IP: 10.0.0.1")).on_app_start("blank", "before");
        let dyn_device: Arc<dyn Device> = device.clone();
        let err = UiVpnRotator::new(VPN, &config(), "t1").rotate(&dyn_device).err().expect("error");
        assert!(err.error.contains("did not change"));
    }
}
