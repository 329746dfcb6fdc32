//! Test doubles shared by the unit and scenario tests.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::app::adb::device::{Device, DeviceConnector, KEY_DEL};
use crate::app::adb::runner::CommandOutput;
use crate::app::error::AppError;
use crate::app::models::{DeviceInfo, DownloadedMedia};
use crate::app::services::caption_gen::CaptionGenerator;
use crate::app::services::drive::MediaDownloader;
use crate::app::services::email_activator::{ActivationResult, EmailActivator};
use crate::app::services::identity::IdentityResetter;
use crate::app::services::imap_code::{CodeRequest, CodeRetriever};
use crate::app::services::prompt::CodePrompt;
use crate::app::services::vpn::VpnRotator;
use crate::app::ui::hierarchy::{Point, UiTree};
use crate::app::ui::xpath;

pub const WIDTH: i32 = 1080;
pub const HEIGHT: i32 = 2400;
pub const TYPED: &str = "{typed}";

pub fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn attrs_xml(attrs: &[(&str, &str)], bounds: [i32; 4]) -> String {
    let mut out = String::new();
    let has_class = attrs.iter().any(|(key, _)| *key == "class");
    if !has_class {
        out.push_str(" class=\"android.widget.TextView\"");
    }
    for (key, value) in attrs {
        let value = if *value == TYPED { TYPED.to_string() } else { escape_attr(value) };
        out.push_str(&format!(" {key}=\"{value}\""));
    }
    out.push_str(&format!(
        " bounds=\"[{},{}][{},{}]\"",
        bounds[0], bounds[1], bounds[2], bounds[3]
    ));
    out
}

/// Leaf `<node>` with the given attributes.
pub fn node(attrs: &[(&str, &str)], bounds: [i32; 4]) -> String {
    format!("<node{} />", attrs_xml(attrs, bounds))
}

pub fn parent(attrs: &[(&str, &str)], bounds: [i32; 4], children: &[String]) -> String {
    format!("<node{}>{}</node>", attrs_xml(attrs, bounds), children.concat())
}

pub fn text(label: &str, bounds: [i32; 4]) -> String {
    node(&[("text", label), ("clickable", "true")], bounds)
}

pub fn desc(label: &str, bounds: [i32; 4]) -> String {
    node(&[("content-desc", label), ("clickable", "true")], bounds)
}

pub fn rid(resource_id: &str, bounds: [i32; 4]) -> String {
    node(&[("resource-id", resource_id), ("clickable", "true")], bounds)
}

/// Full dump with a root frame of the fake display size.
pub fn screen(package: &str, nodes: &[String]) -> String {
    format!(
        "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation=\"0\">\
         <node class=\"android.widget.FrameLayout\" package=\"{package}\" bounds=\"[0,0][{WIDTH},{HEIGHT}]\">{}</node></hierarchy>",
        nodes.concat()
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click(Point),
    Swipe { from: Point, to: Point, duration: Duration },
    Key(String),
    Text(String),
    AppStart { package: String, stop_first: bool },
    AppStop(String),
    Shell(String),
    Push { local: PathBuf, remote: String },
    /// Screenshot taken while the named screen was showing.
    Screenshot(String),
}

#[derive(Debug, Clone)]
enum Trigger {
    /// Click landing inside a node matched by the locator.
    Click(String),
    Key(String),
    AppStart,
    /// After this many dumps of the source screen.
    Dumps(usize),
}

#[derive(Debug, Clone)]
struct Transition {
    from: String,
    trigger: Trigger,
    to: String,
}

struct FakeState {
    screens: HashMap<String, String>,
    current: String,
    dumps_on_current: usize,
    transitions: Vec<Transition>,
    actions: Vec<Action>,
    typed: String,
    foreground: Option<String>,
    offline: bool,
    ignore_app_start: usize,
    ignore_app_stop: bool,
    shell_launch_works: bool,
    files: BTreeSet<String>,
}

/// Scripted device: named screens, transitions on clicks/keys/launches/dump counts.
pub struct FakeDevice {
    serial: String,
    state: Mutex<FakeState>,
}

impl FakeDevice {
    pub fn new(serial: &str) -> Self {
        let blank = screen("com.android.launcher", &[]);
        let mut screens = HashMap::new();
        screens.insert("blank".to_string(), blank);
        Self {
            serial: serial.to_string(),
            state: Mutex::new(FakeState {
                screens,
                current: "blank".to_string(),
                dumps_on_current: 0,
                transitions: Vec::new(),
                actions: Vec::new(),
                typed: String::new(),
                foreground: None,
                offline: false,
                ignore_app_start: 0,
                ignore_app_stop: false,
                shell_launch_works: true,
                files: BTreeSet::new(),
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut guard = self.state.lock().expect("fake device lock");
        f(&mut guard)
    }

    pub fn add_screen(&self, name: &str, xml: String) -> &Self {
        self.with_state(|s| {
            s.screens.insert(name.to_string(), xml);
        });
        self
    }

    pub fn show(&self, name: &str) -> &Self {
        self.with_state(|s| {
            s.current = name.to_string();
            s.dumps_on_current = 0;
        });
        self
    }

    pub fn current_screen(&self) -> String {
        self.with_state(|s| s.current.clone())
    }

    pub fn on_click(&self, from: &str, locator: &str, to: &str) -> &Self {
        self.push_transition(from, Trigger::Click(locator.to_string()), to)
    }

    pub fn on_key(&self, from: &str, key: &str, to: &str) -> &Self {
        self.push_transition(from, Trigger::Key(key.to_string()), to)
    }

    pub fn on_app_start(&self, from: &str, to: &str) -> &Self {
        self.push_transition(from, Trigger::AppStart, to)
    }

    pub fn after_dumps(&self, from: &str, dumps: usize, to: &str) -> &Self {
        self.push_transition(from, Trigger::Dumps(dumps), to)
    }

    fn push_transition(&self, from: &str, trigger: Trigger, to: &str) -> &Self {
        self.with_state(|s| {
            s.transitions.push(Transition {
                from: from.to_string(),
                trigger,
                to: to.to_string(),
            })
        });
        self
    }

    pub fn set_foreground(&self, package: Option<&str>) -> &Self {
        self.with_state(|s| s.foreground = package.map(str::to_string));
        self
    }

    pub fn set_offline(&self, offline: bool) -> &Self {
        self.with_state(|s| s.offline = offline);
        self
    }

    /// The next `count` driver launches leave the foreground unchanged.
    pub fn ignore_app_starts(&self, count: usize) -> &Self {
        self.with_state(|s| s.ignore_app_start = count);
        self
    }

    pub fn ignore_app_stop(&self, ignore: bool) -> &Self {
        self.with_state(|s| s.ignore_app_stop = ignore);
        self
    }

    pub fn shell_launch_works(&self, works: bool) -> &Self {
        self.with_state(|s| s.shell_launch_works = works);
        self
    }

    pub fn set_typed(&self, value: &str) -> &Self {
        self.with_state(|s| s.typed = value.to_string());
        self
    }

    pub fn typed(&self) -> String {
        self.with_state(|s| s.typed.clone())
    }

    pub fn actions(&self) -> Vec<Action> {
        self.with_state(|s| s.actions.clone())
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Click(point) => Some(point),
                _ => None,
            })
            .collect()
    }

    pub fn swipes(&self) -> Vec<(Point, Point, Duration)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Swipe { from, to, duration } => Some((from, to, duration)),
                _ => None,
            })
            .collect()
    }

    pub fn shell_log(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Shell(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Screen names visible at each screenshot, in order.
    pub fn screenshots(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Screenshot(screen) => Some(screen),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<String> {
        self.with_state(|s| s.files.iter().cloned().collect())
    }

    /// Number of clicks that landed on a node matched by `locator` in screen `name`.
    pub fn clicks_on(&self, name: &str, locator: &str) -> usize {
        let xml = self.with_state(|s| s.screens.get(name).cloned()).unwrap_or_default();
        let Ok(tree) = UiTree::parse(&xml) else { return 0 };
        let Ok(selector) = xpath::compile(locator) else { return 0 };
        let targets: Vec<_> = selector
            .select(&tree)
            .into_iter()
            .filter_map(|id| tree.node(id).bounds)
            .collect();
        self.clicks()
            .into_iter()
            .filter(|point| targets.iter().any(|bounds| bounds.contains(*point)))
            .count()
    }

    fn render(state: &FakeState) -> String {
        let xml = state.screens.get(&state.current).cloned().unwrap_or_default();
        xml.replace(TYPED, &escape_attr(&state.typed))
    }

    fn fire(state: &mut FakeState, matches: impl Fn(&Trigger, &FakeState) -> bool) {
        let next = state
            .transitions
            .iter()
            .find(|t| t.from == state.current && matches(&t.trigger, state))
            .map(|t| t.to.clone());
        if let Some(next) = next {
            state.current = next;
            state.dumps_on_current = 0;
        }
    }

    fn check_online(&self) -> Result<(), AppError> {
        if self.with_state(|s| s.offline) {
            return Err(AppError::device(format!("device '{}' not found", self.serial), ""));
        }
        Ok(())
    }
}

impl Device for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn info(&self) -> Result<DeviceInfo, AppError> {
        self.check_online()?;
        Ok(DeviceInfo {
            display_width: WIDTH,
            display_height: HEIGHT,
            sdk: 33,
        })
    }

    fn dump_hierarchy(&self) -> Result<String, AppError> {
        self.check_online()?;
        Ok(self.with_state(|s| {
            let xml = Self::render(s);
            s.dumps_on_current += 1;
            let count = s.dumps_on_current;
            Self::fire(s, |trigger, _| matches!(trigger, Trigger::Dumps(n) if count >= *n));
            xml
        }))
    }

    fn click(&self, at: Point) -> Result<(), AppError> {
        self.check_online()?;
        self.with_state(|s| {
            s.actions.push(Action::Click(at));
            let xml = Self::render(s);
            let tree = UiTree::parse(&xml).unwrap_or_default();
            Self::fire(s, |trigger, _| match trigger {
                Trigger::Click(locator) => xpath::compile(locator)
                    .map(|selector| {
                        selector
                            .select(&tree)
                            .into_iter()
                            .any(|id| tree.node(id).bounds.is_some_and(|b| b.contains(at)))
                    })
                    .unwrap_or(false),
                _ => false,
            });
        });
        Ok(())
    }

    fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), AppError> {
        self.check_online()?;
        self.with_state(|s| s.actions.push(Action::Swipe { from, to, duration }));
        Ok(())
    }

    fn press_key(&self, keycode: &str) -> Result<(), AppError> {
        self.check_online()?;
        self.with_state(|s| {
            s.actions.push(Action::Key(keycode.to_string()));
            if keycode == KEY_DEL {
                s.typed.pop();
            }
            Self::fire(s, |trigger, _| matches!(trigger, Trigger::Key(key) if key == keycode));
        });
        Ok(())
    }

    fn input_text(&self, chunk: &str) -> Result<(), AppError> {
        self.check_online()?;
        self.with_state(|s| {
            s.actions.push(Action::Text(chunk.to_string()));
            s.typed.push_str(chunk);
        });
        Ok(())
    }

    fn current_package(&self) -> Result<Option<String>, AppError> {
        self.check_online()?;
        Ok(self.with_state(|s| s.foreground.clone()))
    }

    fn app_start(&self, package: &str, stop_first: bool) -> Result<(), AppError> {
        self.check_online()?;
        self.with_state(|s| {
            s.actions.push(Action::AppStart {
                package: package.to_string(),
                stop_first,
            });
            if s.ignore_app_start > 0 {
                s.ignore_app_start -= 1;
                return;
            }
            s.foreground = Some(package.to_string());
            Self::fire(s, |trigger, _| matches!(trigger, Trigger::AppStart));
        });
        Ok(())
    }

    fn app_stop(&self, package: &str) -> Result<(), AppError> {
        self.check_online()?;
        self.with_state(|s| {
            s.actions.push(Action::AppStop(package.to_string()));
            if !s.ignore_app_stop && s.foreground.as_deref() == Some(package) {
                s.foreground = None;
            }
        });
        Ok(())
    }

    fn shell(&self, command: &[&str]) -> Result<CommandOutput, AppError> {
        self.check_online()?;
        let joined = command.join(" ");
        self.with_state(|s| {
            s.actions.push(Action::Shell(joined.clone()));
            match command {
                ["rm", "-rf", target] => {
                    let prefix = format!("{}/", target.trim_end_matches('/'));
                    s.files.retain(|file| !file.starts_with(&prefix) && file.as_str() != *target);
                }
                ["am", "kill", package] => {
                    if s.foreground.as_deref() == Some(*package) {
                        s.foreground = None;
                    }
                }
                ["monkey", "-p", package, ..] | ["am", "start", "-n", package, ..] => {
                    if s.shell_launch_works {
                        let package = package.split('/').next().unwrap_or(*package).to_string();
                        s.foreground = Some(package);
                        Self::fire(s, |trigger, _| matches!(trigger, Trigger::AppStart));
                    }
                }
                _ => {}
            }
        });
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    fn push(&self, local: &Path, remote: &str) -> Result<(), AppError> {
        self.check_online()?;
        self.with_state(|s| {
            s.actions.push(Action::Push {
                local: local.to_path_buf(),
                remote: remote.to_string(),
            });
            s.files.insert(remote.to_string());
        });
        Ok(())
    }

    fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        self.check_online()?;
        self.with_state(|s| s.actions.push(Action::Screenshot(s.current.clone())));
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(b"fake");
        Ok(png)
    }
}

pub struct FakeConnector {
    pub device: Arc<FakeDevice>,
}

impl DeviceConnector for FakeConnector {
    fn connect(&self, serial: &str, trace_id: &str) -> Result<Arc<dyn Device>, AppError> {
        if serial != self.device.serial() {
            return Err(AppError::device(format!("Device {serial} is not attached"), trace_id));
        }
        Ok(self.device.clone())
    }
}

pub struct MemoryCaptionGenerator {
    pub caption: String,
}

impl CaptionGenerator for MemoryCaptionGenerator {
    fn generate(&self) -> Result<String, AppError> {
        Ok(self.caption.clone())
    }
}

/// Writes a small file into `out_dir` as if it had been downloaded.
pub struct StaticDownloader {
    pub fail: bool,
}

impl MediaDownloader for StaticDownloader {
    fn download(&self, url: &str, out_dir: &Path) -> Result<DownloadedMedia, AppError> {
        if self.fail {
            return Err(AppError::dependency(format!("Download failed for {url}"), ""));
        }
        fs::create_dir_all(out_dir)
            .map_err(|err| AppError::system(format!("mkdir failed: {err}"), ""))?;
        let local_path = out_dir.join("abc.mp4");
        fs::write(&local_path, b"not really a video")
            .map_err(|err| AppError::system(format!("write failed: {err}"), ""))?;
        Ok(DownloadedMedia {
            local_path,
            mime: "video/mp4".to_string(),
            file_id: "abc".to_string(),
        })
    }
}

/// Returns `None` until call number `succeed_on` (1-based).
pub struct ScriptedCodeRetriever {
    pub code: String,
    pub succeed_on: usize,
    pub calls: AtomicUsize,
}

impl ScriptedCodeRetriever {
    pub fn new(code: &str, succeed_on: usize) -> Self {
        Self {
            code: code.to_string(),
            succeed_on,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CodeRetriever for ScriptedCodeRetriever {
    fn get_code(&self, _request: &CodeRequest) -> Result<Option<String>, AppError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((call >= self.succeed_on).then(|| self.code.clone()))
    }
}

#[derive(Default)]
pub struct CountingActivator {
    pub calls: AtomicUsize,
}

impl EmailActivator for CountingActivator {
    fn activate(&self, _email: &str, _password: &str) -> Result<ActivationResult, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ActivationResult {
            status: "ok".to_string(),
            message: "imap enabled".to_string(),
        })
    }
}

#[derive(Default)]
pub struct NoopRotator {
    pub calls: AtomicUsize,
}

impl VpnRotator for NoopRotator {
    fn rotate(&self, _device: &Arc<dyn Device>) -> Result<(), AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl IdentityResetter for NoopRotator {
    fn reset(&self, _device: &Arc<dyn Device>) -> Result<bool, AppError> {
        Ok(true)
    }
}

pub struct FixedPrompt(pub Option<String>);

impl CodePrompt for FixedPrompt {
    fn ask_code(&self, _email: &str) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clicks_drive_transitions() {
        let device = FakeDevice::new("D1");
        device
            .add_screen("home", screen("com.example.ig", &[text("Next", [0, 0, 100, 100])]))
            .add_screen("done", screen("com.example.ig", &[]))
            .on_click("home", "//*[@text='Next']", "done")
            .show("home");
        device.click(Point::new(500, 500)).expect("click");
        assert_eq!(device.current_screen(), "home");
        device.click(Point::new(50, 50)).expect("click");
        assert_eq!(device.current_screen(), "done");
    }

    #[test]
    fn typed_text_is_rendered_into_screens() {
        let device = FakeDevice::new("D1");
        device
            .add_screen("edit", screen("p", &[node(&[("resource-id", "p:id/caption"), ("text", TYPED)], [0, 0, 10, 10])]))
            .show("edit");
        device.input_text("a&b").expect("type");
        device.press_key(KEY_DEL).expect("del");
        let xml = device.dump_hierarchy().expect("dump");
        let tree = UiTree::parse(&xml).expect("tree");
        let ids = xpath::compile("@caption").expect("selector").select(&tree);
        assert_eq!(tree.node(ids[0]).text(), "a&");
    }

    #[test]
    fn rm_rf_removes_pushed_album() {
        let device = FakeDevice::new("D1");
        device.push(Path::new("/tmp/x.mp4"), "/sdcard/Pictures/u1/u1_1.mp4").expect("push");
        assert_eq!(device.files().len(), 1);
        device.shell(&["rm", "-rf", "/sdcard/Pictures/u1"]).expect("rm");
        assert!(device.files().is_empty());
    }
}
