//! Fault-tolerant interaction surface over one device and one app package.
//!
//! Every method with side effects returns a plain success value and logs the
//! failure instead of raising. The one exception is [`UiEngine::open_app`], which
//! surfaces device-transport failures so the run can end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::app::adb::device::{Device, KEY_BACK, KEY_HOME};
use crate::app::config::{AppConfig, LaunchSettings};
use crate::app::error::AppError;
use crate::app::state::CancelFlag;
use crate::app::ui::capture;
use crate::app::ui::catalog::{Loc, XpathCatalog};
use crate::app::ui::gestures::{random_between, Gestures, Pacer, Screen};
use crate::app::ui::hierarchy::{Bounds, Point, UiTree};
use crate::app::ui::typing::StealthTyper;
use crate::app::ui::xpath::{self, Selector};

const SHORT_SETTLE: Duration = Duration::from_millis(800);

/// Resolved attributes of one screen node. Never cached across screens.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInfo {
    pub text: String,
    pub content_desc: String,
    pub resource_id: String,
    pub class_name: String,
    pub bounds: Bounds,
    pub selected: bool,
    pub clickable: bool,
}

impl ElementInfo {
    fn from_tree(tree: &UiTree, id: usize) -> Self {
        let node = tree.node(id);
        Self {
            text: node.text().to_string(),
            content_desc: node.content_desc().to_string(),
            resource_id: node.resource_id().to_string(),
            class_name: node.class_name().to_string(),
            bounds: node.bounds.unwrap_or_default(),
            selected: node.selected(),
            clickable: node.clickable(),
        }
    }
}

/// One way of bringing an app to the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// Driver launch without a restart.
    Driver,
    /// Driver launch with a forced stop first.
    DriverStopFirst,
    /// `am start -n <package>/<activity>`.
    ActivityManager { activity: String },
    /// `monkey -p <package> -c android.intent.category.LAUNCHER 1`.
    Monkey,
}

impl LaunchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::DriverStopFirst => "driver_stop_first",
            Self::ActivityManager { .. } => "activity_manager",
            Self::Monkey => "monkey",
        }
    }

    pub fn launch(&self, device: &dyn Device, package: &str) -> Result<(), AppError> {
        match self {
            Self::Driver => device.app_start(package, false),
            Self::DriverStopFirst => device.app_start(package, true),
            Self::ActivityManager { activity } => {
                let component = if activity.contains('/') {
                    activity.clone()
                } else {
                    format!("{package}/{activity}")
                };
                let output = device.shell(&["am", "start", "-n", &component])?;
                if !output.success() || output.stdout.contains("Error:") {
                    return Err(AppError::dependency(
                        format!("am start failed for {component}: {}", output.stdout.trim()),
                        "",
                    ));
                }
                Ok(())
            }
            Self::Monkey => {
                let output = device.shell(&[
                    "monkey",
                    "-p",
                    package,
                    "-c",
                    "android.intent.category.LAUNCHER",
                    "1",
                ])?;
                if !output.success() || output.stdout.contains("No activities found") {
                    return Err(AppError::dependency(
                        format!("monkey launch failed for {package}"),
                        "",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// The default cascade; the activity-manager step needs a configured activity.
pub fn default_launch_strategies(settings: &LaunchSettings) -> Vec<LaunchStrategy> {
    let mut strategies = vec![LaunchStrategy::Driver, LaunchStrategy::DriverStopFirst];
    if let Some(activity) = settings.main_activity.as_ref().filter(|a| !a.trim().is_empty()) {
        strategies.push(LaunchStrategy::ActivityManager {
            activity: activity.trim().to_string(),
        });
    }
    strategies.push(LaunchStrategy::Monkey);
    strategies
}

pub struct UiEngine {
    device: Arc<dyn Device>,
    package: String,
    catalog: Arc<XpathCatalog>,
    gestures: Gestures,
    typer: StealthTyper,
    pacer: Pacer,
    poll: Duration,
    launch: LaunchSettings,
    strategies: Vec<LaunchStrategy>,
    cancel: Option<CancelFlag>,
    selectors: Mutex<HashMap<String, Arc<Selector>>>,
    trace_id: String,
}

impl UiEngine {
    /// Probes the device for its display size; a dead device fails here.
    pub fn new(
        device: Arc<dyn Device>,
        catalog: Arc<XpathCatalog>,
        config: &AppConfig,
        trace_id: &str,
    ) -> Result<Self, AppError> {
        let info = device.info()?;
        let screen = Screen {
            width: info.display_width,
            height: info.display_height,
        };
        let pacer = Pacer::new(config.engine.time_scale);
        let gestures = Gestures::new(
            device.clone(),
            screen,
            config.scroller.swipe_intensity,
            config.engine.screen_bands,
            pacer,
        );
        let typer = StealthTyper::new(device.clone(), pacer);
        Ok(Self {
            package: catalog.package().to_string(),
            device,
            catalog,
            gestures,
            typer,
            pacer,
            poll: Duration::from_millis(config.engine.poll_interval_ms),
            strategies: default_launch_strategies(&config.launch),
            launch: config.launch.clone(),
            cancel: None,
            selectors: Mutex::new(HashMap::new()),
            trace_id: trace_id.to_string(),
        })
    }

    /// Waits end early once the flag is set.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_launch_strategies(mut self, strategies: Vec<LaunchStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn catalog(&self) -> &XpathCatalog {
        &self.catalog
    }

    pub fn loc(&self, loc: Loc) -> &str {
        self.catalog.get(loc)
    }

    pub fn pacer(&self) -> Pacer {
        self.pacer
    }

    pub fn gestures(&self) -> &Gestures {
        &self.gestures
    }

    pub fn screen(&self) -> Screen {
        self.gestures.screen()
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(CancelFlag::is_set).unwrap_or(false)
    }

    fn selector(&self, locator: &str) -> Option<Arc<Selector>> {
        if let Ok(cache) = self.selectors.lock() {
            if let Some(selector) = cache.get(locator) {
                return Some(selector.clone());
            }
        }
        match xpath::compile(locator) {
            Ok(selector) => {
                let selector = Arc::new(selector);
                if let Ok(mut cache) = self.selectors.lock() {
                    cache.insert(locator.to_string(), selector.clone());
                }
                Some(selector)
            }
            Err(err) => {
                error!(trace_id = %self.trace_id, locator = %locator, error = %err, "❌ invalid locator");
                None
            }
        }
    }

    /// Fresh dump of the current screen.
    pub fn snapshot(&self) -> Result<UiTree, AppError> {
        let xml = self.device.dump_hierarchy()?;
        UiTree::parse(&xml).map_err(|err| {
            AppError::dependency(format!("Unparseable hierarchy: {err}"), &self.trace_id)
        })
    }

    fn matches_in(&self, tree: &UiTree, locator: &str) -> Vec<ElementInfo> {
        self.selector(locator)
            .map(|selector| {
                selector
                    .select(tree)
                    .into_iter()
                    .map(|id| ElementInfo::from_tree(tree, id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find_all(&self, locator: &str) -> Vec<ElementInfo> {
        match self.snapshot() {
            Ok(tree) => self.matches_in(&tree, locator),
            Err(err) => {
                debug!(trace_id = %self.trace_id, error = %err, "hierarchy dump failed");
                Vec::new()
            }
        }
    }

    pub fn find_element(&self, locator: &str) -> Option<ElementInfo> {
        self.find_all(locator).into_iter().next()
    }

    fn first_visible(&self, locator: &str) -> Option<ElementInfo> {
        let all = self.find_all(locator);
        all.iter()
            .find(|element| !element.bounds.is_empty())
            .cloned()
            .or_else(|| all.into_iter().next())
    }

    pub fn element_exists(&self, locator: &str) -> bool {
        !self.find_all(locator).is_empty()
    }

    fn poll_until(&self, timeout: Duration, poll: Option<Duration>, mut check: impl FnMut() -> bool) -> bool {
        let deadline = self.pacer.scale(timeout);
        let poll = self.pacer.scale(poll.unwrap_or(self.poll));
        let started = Instant::now();
        loop {
            if check() {
                return true;
            }
            if self.cancelled() || started.elapsed() >= deadline {
                return false;
            }
            std::thread::sleep(poll.min(deadline.saturating_sub(started.elapsed())));
        }
    }

    pub fn wait_for_element_appear(&self, locator: &str, timeout: Duration, poll: Option<Duration>) -> bool {
        let found = self.poll_until(timeout, poll, || self.element_exists(locator));
        debug!(trace_id = %self.trace_id, locator = %locator, found, "wait_for_element_appear");
        found
    }

    pub fn wait_for_element_vanish(&self, locator: &str, timeout: Duration, poll: Option<Duration>) -> bool {
        let gone = self.poll_until(timeout, poll, || match self.snapshot() {
            Ok(tree) => self.matches_in(&tree, locator).is_empty(),
            Err(_) => false,
        });
        debug!(trace_id = %self.trace_id, locator = %locator, gone, "wait_for_element_vanish");
        gone
    }

    /// Index of the first locator observed, checking all of them against one dump per poll.
    pub fn wait_for_any(&self, locators: &[&str], timeout: Duration) -> Option<usize> {
        let mut hit = None;
        self.poll_until(timeout, None, || {
            let Ok(tree) = self.snapshot() else { return false };
            hit = locators
                .iter()
                .position(|locator| !self.matches_in(&tree, locator).is_empty());
            hit.is_some()
        });
        hit
    }

    fn click_point(&self, point: Point, what: &str) -> bool {
        match self.gestures.tap(point) {
            Ok(()) => true,
            Err(err) => {
                error!(trace_id = %self.trace_id, target = %what, error = %err, "❌ click failed");
                false
            }
        }
    }

    pub fn click_by_locator(&self, locator: &str, timeout: Duration) -> bool {
        if !self.wait_for_element_appear(locator, timeout, None) {
            warn!(trace_id = %self.trace_id, locator = %locator, "⚠️ element not found for click");
            return false;
        }
        let Some(element) = self.first_visible(locator) else {
            warn!(trace_id = %self.trace_id, locator = %locator, "⚠️ element vanished before click");
            return false;
        };
        let clicked = self.click_point(element.bounds.center(), locator);
        if clicked {
            info!(trace_id = %self.trace_id, locator = %locator, "clicked");
        }
        clicked
    }

    /// Clicks an element already resolved from the current screen.
    pub fn click_element(&self, element: &ElementInfo) -> bool {
        if element.bounds.is_empty() {
            return false;
        }
        self.click_point(element.bounds.center(), &element.resource_id)
    }

    pub fn click_loc(&self, loc: Loc, timeout: Duration) -> bool {
        self.click_by_locator(self.catalog.get(loc), timeout)
    }

    /// Optional prompts: absence is not worth a warning.
    pub fn click_if_exists(&self, locator: &str, short_timeout: Duration) -> bool {
        if !self.wait_for_element_appear(locator, short_timeout, None) {
            return false;
        }
        match self.first_visible(locator) {
            Some(element) => self.click_point(element.bounds.center(), locator),
            None => false,
        }
    }

    pub fn input_text(&self, locator: &str, text: &str, clear_first: bool, timeout: Duration) -> bool {
        if !self.click_by_locator(locator, timeout) {
            return false;
        }
        self.pacer.sleep_between(0.2, 0.5);
        if clear_first {
            let existing = self
                .get_element_text(locator)
                .map(|value| value.chars().count())
                .unwrap_or(0);
            if let Err(err) = self.typer.clear(existing) {
                error!(trace_id = %self.trace_id, error = %err, "❌ clearing field failed");
                return false;
            }
        }
        self.type_focused(text)
    }

    /// Stealth-types into whatever field has focus.
    pub fn type_focused(&self, text: &str) -> bool {
        match self.typer.type_text(text) {
            Ok(sent) => {
                debug!(trace_id = %self.trace_id, clusters = sent, "typed text");
                true
            }
            Err(err) => {
                error!(trace_id = %self.trace_id, error = %err, "❌ typing failed");
                false
            }
        }
    }

    pub fn press_enter(&self) -> bool {
        self.typer.press_enter().is_ok()
    }

    pub fn get_element_text(&self, locator: &str) -> Option<String> {
        self.find_element(locator).map(|element| element.text)
    }

    pub fn get_element_attribute(&self, locator: &str, attr: &str) -> Option<String> {
        let tree = self.snapshot().ok()?;
        let selector = self.selector(locator)?;
        let id = selector.select(&tree).into_iter().next()?;
        tree.node(id).attr(attr).map(str::to_string)
    }

    pub fn tap_random_within_element(&self, locator: &str, offset: i32) -> bool {
        let Some(element) = self.first_visible(locator) else {
            return false;
        };
        match self.gestures.tap_random_within(element.bounds, offset) {
            Ok(point) => {
                debug!(trace_id = %self.trace_id, locator = %locator, x = point.x, y = point.y, "random tap");
                true
            }
            Err(err) => {
                error!(trace_id = %self.trace_id, locator = %locator, error = %err, "❌ random tap failed");
                false
            }
        }
    }

    /// Curved approach onto the element center.
    pub fn curved_tap_element(&self, locator: &str) -> bool {
        let Some(element) = self.first_visible(locator) else {
            return false;
        };
        self.gestures.curved_tap(element.bounds.center()).is_ok()
    }

    /// Tap, linger, back out. Always tries to leave with a back press.
    pub fn peek_element(&self, locator: &str, min_view: f64, max_view: f64) -> bool {
        if !self.tap_random_within_element(locator, 8) {
            return false;
        }
        let lingered = random_between(min_view, max_view);
        self.pacer.sleep_secs(lingered);
        if !self.press_back() {
            warn!(trace_id = %self.trace_id, "⚠️ back press after peek failed, retrying once");
            return self.press_back();
        }
        true
    }

    fn scroll_duration(&self) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(280..=650))
    }

    pub fn scroll_up_humanlike(&self) -> bool {
        self.gestures.scroll_up(self.scroll_duration()).is_ok()
    }

    pub fn scroll_down_humanlike(&self) -> bool {
        self.gestures.scroll_down(self.scroll_duration()).is_ok()
    }

    /// Drags from the element's center by a fraction of the screen height (negative is up).
    pub fn drag_element_vertically(&self, locator: &str, fraction: f64) -> bool {
        let Some(element) = self.first_visible(locator) else {
            return false;
        };
        let from = element.bounds.center();
        let to = Point::new(
            from.x,
            from.y + (self.screen().height as f64 * fraction).round() as i32,
        );
        let duration = Duration::from_millis(rand::thread_rng().gen_range(400..=700));
        self.gestures.drag(from, to, duration).is_ok()
    }

    pub fn scrub_element(&self, locator: &str) -> Option<u32> {
        let element = self.first_visible(locator)?;
        self.gestures.scrub(element.bounds).ok()
    }

    /// Clicks the first clickable node whose text or description contains any of `texts`
    /// (case-insensitive), else the fallback locator, all under one deadline.
    pub fn smart_button_clicker(&self, texts: &[&str], fallback: Option<&str>, timeout: Duration) -> bool {
        if texts.is_empty() {
            return match fallback {
                Some(locator) => self.click_by_locator(locator, timeout),
                None => false,
            };
        }
        let needles: Vec<String> = texts.iter().map(|text| text.to_lowercase()).collect();
        let mut target: Option<(Point, String)> = None;
        self.poll_until(timeout, None, || {
            let Ok(tree) = self.snapshot() else { return false };
            for id in tree.ids() {
                let node = tree.node(id);
                let text = node.text().to_lowercase();
                let desc = node.content_desc().to_lowercase();
                let hit = needles
                    .iter()
                    .any(|needle| text.contains(needle.as_str()) || desc.contains(needle.as_str()));
                let visible = node.bounds.filter(|bounds| !bounds.is_empty());
                if let (true, true, Some(bounds)) = (hit, node.clickable(), visible) {
                    target = Some((bounds.center(), format!("{} {}", node.text(), node.content_desc())));
                    return true;
                }
            }
            if let Some(locator) = fallback {
                let matches = self.matches_in(&tree, locator);
                if let Some(element) = matches.into_iter().find(|e| !e.bounds.is_empty()) {
                    target = Some((element.bounds.center(), locator.to_string()));
                    return true;
                }
            }
            false
        });
        match target {
            Some((point, label)) => self.click_point(point, label.trim()),
            None => {
                warn!(trace_id = %self.trace_id, texts = ?texts, "⚠️ smart_button_clicker found nothing");
                false
            }
        }
    }

    pub fn click_with_fallback(&self, primary: &str, fallback: Point) -> bool {
        if let Some(element) = self.first_visible(primary) {
            return self.click_point(element.bounds.center(), primary);
        }
        info!(trace_id = %self.trace_id, x = fallback.x, y = fallback.y, "primary locator absent, clicking fallback coordinates");
        self.click_point(fallback, "fallback coordinates")
    }

    pub fn press_back(&self) -> bool {
        match self.device.press_key(KEY_BACK) {
            Ok(()) => true,
            Err(err) => {
                error!(trace_id = %self.trace_id, error = %err, "❌ back press failed");
                false
            }
        }
    }

    /// `Err` only for device-transport failures; other lookup errors read as "unknown".
    fn foreground(&self) -> Result<Option<String>, AppError> {
        match self.device.current_package() {
            Ok(package) => Ok(package),
            Err(err) if err.is_device_failure() => Err(err),
            Err(err) => {
                debug!(trace_id = %self.trace_id, error = %err, "foreground lookup failed");
                Ok(None)
            }
        }
    }

    fn in_foreground(&self) -> Result<bool, AppError> {
        Ok(self.foreground()?.as_deref() == Some(self.package.as_str()))
    }

    fn run_cascade(&self) -> Result<bool, AppError> {
        let backoff = Duration::from_millis(self.launch.backoff_ms);
        for strategy in &self.strategies {
            match strategy.launch(self.device.as_ref(), &self.package) {
                Ok(()) => {}
                Err(err) if err.is_device_failure() => return Err(err),
                Err(err) => {
                    warn!(trace_id = %self.trace_id, strategy = strategy.name(), error = %err, "⚠️ launch strategy failed");
                }
            }
            self.pacer.sleep(backoff);
            if self.in_foreground()? {
                info!(trace_id = %self.trace_id, package = %self.package, strategy = strategy.name(), "app launched");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True only when the package is in the foreground and `readiness` (if any) is on screen.
    pub fn open_app(&self, readiness: Option<&str>, readiness_timeout: Duration, max_retries: u32) -> Result<bool, AppError> {
        let backoff = Duration::from_millis(self.launch.backoff_ms);
        for attempt in 1..=max_retries.max(1) {
            if self.cancelled() {
                return Ok(false);
            }
            let launched = if self.in_foreground()? {
                debug!(trace_id = %self.trace_id, package = %self.package, "already in foreground");
                true
            } else {
                self.run_cascade()?
            };
            if launched {
                let ready = match readiness {
                    None => true,
                    Some(locator) => self.wait_for_element_appear(locator, readiness_timeout, None),
                };
                if ready && self.in_foreground()? {
                    info!(trace_id = %self.trace_id, package = %self.package, attempt, "✅ app ready");
                    return Ok(true);
                }
                warn!(trace_id = %self.trace_id, package = %self.package, attempt, "⚠️ app launched but not ready");
            }
            self.pacer.sleep(backoff * attempt * 2);
        }
        error!(trace_id = %self.trace_id, package = %self.package, "❌ failed to open app");
        Ok(false)
    }

    /// Idempotent: driver force-stop, verify, then HOME plus `am kill`, verify again.
    pub fn close_app(&self) -> bool {
        if let Err(err) = self.device.app_stop(&self.package) {
            warn!(trace_id = %self.trace_id, error = %err, "⚠️ driver stop failed");
        }
        self.pacer.sleep(SHORT_SETTLE);
        if matches!(self.in_foreground(), Ok(false)) {
            debug!(trace_id = %self.trace_id, package = %self.package, "app closed");
            return true;
        }
        // Force-stop did not take: background the app, then kill its process.
        if let Err(err) = self.device.press_key(KEY_HOME) {
            warn!(trace_id = %self.trace_id, error = %err, "⚠️ HOME press failed while closing app");
        }
        self.pacer.sleep(SHORT_SETTLE);
        match self.device.shell(&["am", "kill", &self.package]) {
            Ok(output) if !output.success() => {
                warn!(trace_id = %self.trace_id, stderr = %output.stderr.trim(), "⚠️ am kill failed");
            }
            Ok(_) => {}
            Err(err) => warn!(trace_id = %self.trace_id, error = %err, "⚠️ am kill failed"),
        }
        self.pacer.sleep(SHORT_SETTLE);
        let closed = matches!(self.in_foreground(), Ok(false));
        if !closed {
            error!(trace_id = %self.trace_id, package = %self.package, "❌ app still in foreground after escalation");
        }
        closed
    }

    /// Screenshots for downstream visual analysis; empty on failure.
    pub fn capture_frames(&self, count: usize, interval: Duration, dir: &Path) -> Vec<PathBuf> {
        match capture::capture_frames(self.device.as_ref(), count, interval, dir, self.pacer, &self.trace_id) {
            Ok(frames) => frames,
            Err(err) => {
                error!(trace_id = %self.trace_id, error = %err, "❌ frame capture failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{desc, node, rid, screen, text, Action, FakeDevice};

    const PKG: &str = "com.example.ig";

    fn engine(device: Arc<FakeDevice>) -> UiEngine {
        let mut config = AppConfig::default();
        config.engine.time_scale = 0.0;
        let catalog = Arc::new(XpathCatalog::for_package(PKG));
        UiEngine::new(device, catalog, &config, "t1").expect("engine")
    }

    fn home(device: &FakeDevice) {
        device.add_screen(
            "home",
            screen(PKG, &[
                rid(&format!("{PKG}:id/feed_tab"), [0, 2200, 200, 2400]),
                desc("Create", [440, 2200, 640, 2400]),
                text("Next", [900, 100, 1060, 180]),
            ]),
        );
    }

    #[test]
    fn zero_timeout_wait_is_a_single_poll() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.show("home");
        let engine = engine(device.clone());
        assert!(engine.wait_for_element_appear("Next", Duration::ZERO, None));
        assert!(!engine.wait_for_element_appear("Share", Duration::ZERO, None));
    }

    #[test]
    fn click_uses_element_center() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.show("home");
        let engine = engine(device.clone());
        assert!(engine.click_by_locator("Next", Duration::from_secs(1)));
        assert_eq!(device.clicks(), vec![Point::new(980, 140)]);
        assert!(!engine.click_by_locator("Share", Duration::from_secs(1)));
        assert!(!engine.click_if_exists("//*[@text=", Duration::ZERO));
    }

    #[test]
    fn wait_for_any_reports_first_matching_locator() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.show("home");
        let engine = engine(device);
        assert_eq!(engine.wait_for_any(&["Share", "Create", "Next"], Duration::ZERO), Some(1));
        assert_eq!(engine.wait_for_any(&["Share"], Duration::ZERO), None);
    }

    #[test]
    fn vanish_wait_sees_transition() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.add_screen("after", screen(PKG, &[]));
        device.show("home").after_dumps("home", 1, "after");
        let engine = engine(device);
        assert!(!engine.wait_for_element_vanish("Next", Duration::ZERO, None));
        assert!(engine.wait_for_element_vanish("Next", Duration::ZERO, None));
    }

    #[test]
    fn random_tap_stays_inside_inset_bounds() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.show("home");
        let engine = engine(device.clone());
        for _ in 0..20 {
            assert!(engine.tap_random_within_element("Next", 10));
        }
        for point in device.clicks() {
            assert!(point.x >= 910 && point.x < 1050 && point.y >= 110 && point.y < 170);
        }
    }

    #[test]
    fn smart_clicker_with_no_texts_is_a_locator_click() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.show("home");
        let engine = engine(device.clone());
        assert!(engine.smart_button_clicker(&[], Some("Next"), Duration::ZERO));
        assert_eq!(device.clicks(), vec![Point::new(980, 140)]);
        assert!(!engine.smart_button_clicker(&[], None, Duration::ZERO));
    }

    #[test]
    fn smart_clicker_matches_case_insensitive_substrings() {
        let device = Arc::new(FakeDevice::new("D1"));
        device.add_screen(
            "dialog",
            screen(PKG, &[
                node(&[("text", "NOT NOW"), ("clickable", "false")], [0, 0, 100, 100]),
                text("Not now, thanks", [0, 200, 400, 300]),
            ]),
        );
        device.show("dialog");
        let engine = engine(device.clone());
        assert!(engine.smart_button_clicker(&["not now"], None, Duration::ZERO));
        assert_eq!(device.clicks(), vec![Point::new(200, 250)]);
    }

    #[test]
    fn click_with_fallback_uses_coordinates_when_missing() {
        let device = Arc::new(FakeDevice::new("D1"));
        let engine = engine(device.clone());
        assert!(engine.click_with_fallback("Next", Point::new(10, 20)));
        assert_eq!(device.clicks(), vec![Point::new(10, 20)]);
    }

    #[test]
    fn curved_tap_lands_on_the_element_center() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.show("home");
        let engine = engine(device.clone());
        assert!(engine.curved_tap_element("Next"));
        let swipes = device.swipes();
        assert!(!swipes.is_empty());
        assert_eq!(swipes.last().map(|(_, to, _)| *to), Some(Point::new(980, 140)));
        assert!(!engine.curved_tap_element("Share"));
    }

    #[test]
    fn scroll_up_moves_the_finger_down_the_screen() {
        let device = Arc::new(FakeDevice::new("D1"));
        let engine = engine(device.clone());
        assert!(engine.scroll_up_humanlike());
        let swipes = device.swipes();
        let (start, _, _) = swipes.first().copied().expect("swipe");
        let (_, end, _) = swipes.last().copied().expect("swipe");
        assert!(start.y < end.y, "{start:?} -> {end:?}");
        device.set_offline(true);
        assert!(!engine.scroll_up_humanlike());
    }

    #[test]
    fn custom_strategy_list_replaces_the_cascade() {
        let device = Arc::new(FakeDevice::new("D1"));
        let engine = engine(device.clone()).with_launch_strategies(vec![LaunchStrategy::Monkey]);
        assert!(engine.open_app(None, Duration::ZERO, 1).expect("open"));
        assert!(!device.actions().iter().any(|a| matches!(a, Action::AppStart { .. })));
        assert!(device
            .shell_log()
            .iter()
            .any(|cmd| cmd == "monkey -p com.example.ig -c android.intent.category.LAUNCHER 1"));
    }

    #[test]
    fn peek_taps_then_goes_back() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.show("home");
        let engine = engine(device.clone());
        assert!(engine.peek_element("Next", 1.0, 2.0));
        let actions = device.actions();
        assert!(matches!(actions.first(), Some(Action::Click(_))));
        assert_eq!(actions.last(), Some(&Action::Key(KEY_BACK.to_string())));
    }

    #[test]
    fn open_app_skips_launch_when_already_foreground() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.show("home").set_foreground(Some(PKG));
        let engine = engine(device.clone());
        let feed = engine.loc(Loc::HomeFeed).to_string();
        assert!(engine.open_app(Some(&feed), Duration::from_secs(5), 3).expect("open"));
        assert!(!device.actions().iter().any(|a| matches!(a, Action::AppStart { .. })));
    }

    #[test]
    fn open_app_walks_the_cascade() {
        let device = Arc::new(FakeDevice::new("D1"));
        home(&device);
        device.on_app_start("blank", "home").ignore_app_starts(2);
        let engine = engine(device.clone());
        let feed = engine.loc(Loc::HomeFeed).to_string();
        assert!(engine.open_app(Some(&feed), Duration::from_secs(5), 1).expect("open"));
        let launches: Vec<_> = device
            .actions()
            .into_iter()
            .filter(|a| matches!(a, Action::AppStart { .. } | Action::Shell(_)))
            .collect();
        assert_eq!(launches.len(), 3, "driver, driver stop-first, then activity manager");
        assert!(matches!(&launches[1], Action::AppStart { stop_first: true, .. }));
        assert!(matches!(&launches[2], Action::Shell(cmd) if cmd.starts_with("am start -n com.example.ig/")));
    }

    #[test]
    fn open_app_requires_readiness() {
        let device = Arc::new(FakeDevice::new("D1"));
        let engine = engine(device.clone());
        let feed = engine.loc(Loc::HomeFeed).to_string();
        assert!(!engine.open_app(Some(&feed), Duration::from_secs(5), 2).expect("open"));
        assert!(engine.open_app(None, Duration::from_secs(5), 1).expect("open"));
    }

    #[test]
    fn open_app_reraises_device_failures() {
        let device = Arc::new(FakeDevice::new("D1"));
        let engine = engine(device.clone());
        device.set_offline(true);
        let err = engine.open_app(None, Duration::ZERO, 3).err().expect("device error");
        assert!(err.is_device_failure());
    }

    #[test]
    fn close_app_escalates_and_is_idempotent() {
        let device = Arc::new(FakeDevice::new("D1"));
        device.set_foreground(Some(PKG)).ignore_app_stop(true);
        let engine = engine(device.clone());
        assert!(engine.close_app());
        let actions = device.actions();
        let stops = actions.iter().filter(|a| matches!(a, Action::AppStop(_))).count();
        assert_eq!(stops, 1, "force-stop is issued once, not repeated as escalation");
        let home = actions.iter().position(|a| *a == Action::Key(KEY_HOME.to_string())).expect("home");
        let kill = actions
            .iter()
            .position(|a| *a == Action::Shell("am kill com.example.ig".to_string()))
            .expect("kill");
        assert!(home < kill);
        assert!(engine.close_app());
        assert_eq!(device.current_package().expect("pkg"), None);
    }

    #[test]
    fn close_app_on_a_dead_device_reports_failure() {
        let device = Arc::new(FakeDevice::new("D1"));
        device.set_foreground(Some(PKG));
        let engine = engine(device.clone());
        device.set_offline(true);
        assert!(!engine.close_app());
    }

    #[test]
    fn cascade_is_an_ordered_strategy_list() {
        let mut settings = LaunchSettings::default();
        assert_eq!(
            default_launch_strategies(&settings).iter().map(LaunchStrategy::name).collect::<Vec<_>>(),
            vec!["driver", "driver_stop_first", "activity_manager", "monkey"]
        );
        settings.main_activity = None;
        assert_eq!(default_launch_strategies(&settings).len(), 3);
    }

    #[test]
    fn input_text_clears_then_types() {
        let device = Arc::new(FakeDevice::new("D1"));
        device.add_screen(
            "form",
            screen(PKG, &[node(&[("resource-id", "com.example.ig:id/field"), ("text", crate::app::testing::TYPED)], [0, 0, 500, 100])]),
        );
        device.show("form").set_typed("old");
        let engine = engine(device.clone());
        assert!(engine.input_text("@field", "new", true, Duration::ZERO));
        assert_eq!(device.typed(), "new");
        assert_eq!(engine.get_element_text("@field").as_deref(), Some("new"));
        assert_eq!(engine.get_element_attribute("@field", "resource-id").as_deref(), Some("com.example.ig:id/field"));
    }
}
