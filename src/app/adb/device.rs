use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::app::adb::parse::{
    parse_adb_devices, parse_focused_package, parse_resolved_activity, parse_sdk_level,
    parse_wm_size,
};
use crate::app::adb::runner::{
    ensure_success, run_command_with_timeout, AdbRunner, CommandOutput, PUSH_TIMEOUT,
    SHELL_TIMEOUT,
};
use crate::app::error::AppError;
use crate::app::models::DeviceInfo;
use crate::app::ui::hierarchy::Point;

const DUMP_TIMEOUT: Duration = Duration::from_secs(20);
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(15);
const HIERARCHY_END: &str = "</hierarchy>";

pub const KEY_BACK: &str = "KEYCODE_BACK";
pub const KEY_ENTER: &str = "KEYCODE_ENTER";
pub const KEY_HOME: &str = "KEYCODE_HOME";
pub const KEY_DEL: &str = "KEYCODE_DEL";
pub const KEY_MOVE_END: &str = "KEYCODE_MOVE_END";

/// Everything the automation layers need from one attached handset.
///
/// Implementations must be shareable across the workflow thread and the
/// watcher thread; the transport serializes concurrent calls on its own.
pub trait Device: Send + Sync {
    fn serial(&self) -> &str;
    /// Cheap liveness probe that also reports the display size.
    fn info(&self) -> Result<DeviceInfo, AppError>;
    /// Raw `uiautomator dump` XML of the current screen.
    fn dump_hierarchy(&self) -> Result<String, AppError>;
    fn click(&self, at: Point) -> Result<(), AppError>;
    fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), AppError>;
    fn press_key(&self, keycode: &str) -> Result<(), AppError>;
    /// Injects one chunk of text into the focused field.
    fn input_text(&self, chunk: &str) -> Result<(), AppError>;
    fn current_package(&self) -> Result<Option<String>, AppError>;
    fn app_start(&self, package: &str, stop_first: bool) -> Result<(), AppError>;
    fn app_stop(&self, package: &str) -> Result<(), AppError>;
    fn shell(&self, command: &[&str]) -> Result<CommandOutput, AppError>;
    fn push(&self, local: &Path, remote: &str) -> Result<(), AppError>;
    /// PNG bytes of the current screen.
    fn screenshot(&self) -> Result<Vec<u8>, AppError>;
}

/// Hands out device handles for ADB serials.
pub trait DeviceConnector: Send + Sync {
    fn connect(&self, serial: &str, trace_id: &str) -> Result<Arc<dyn Device>, AppError>;
}

pub struct AdbDevice {
    runner: AdbRunner,
}

impl AdbDevice {
    pub fn new(program: &str, serial: &str, trace_id: &str) -> Self {
        Self {
            runner: AdbRunner::new(program, serial, trace_id),
        }
    }

    fn trace_id(&self) -> &str {
        self.runner.trace_id()
    }

    fn shell_checked(&self, command: &[&str], what: &str) -> Result<CommandOutput, AppError> {
        let output = self.runner.shell(command)?;
        ensure_success(&output, what, self.trace_id())?;
        Ok(output)
    }

    fn resolve_launcher_activity(&self, package: &str) -> Result<String, AppError> {
        let output = self.runner.shell(&[
            "cmd",
            "package",
            "resolve-activity",
            "--brief",
            "-c",
            "android.intent.category.LAUNCHER",
            package,
        ])?;
        parse_resolved_activity(&output.stdout).ok_or_else(|| {
            AppError::dependency(
                format!("No launcher activity resolved for {package}"),
                self.trace_id(),
            )
        })
    }
}

impl Device for AdbDevice {
    fn serial(&self) -> &str {
        self.runner.serial()
    }

    fn info(&self) -> Result<DeviceInfo, AppError> {
        let size = self.shell_checked(&["wm", "size"], "wm size")?;
        let (display_width, display_height) = parse_wm_size(&size.stdout).ok_or_else(|| {
            AppError::device(
                format!("Unreadable display size: {}", size.stdout.trim()),
                self.trace_id(),
            )
        })?;
        let sdk = self
            .runner
            .shell(&["getprop", "ro.build.version.sdk"])
            .ok()
            .and_then(|output| parse_sdk_level(&output.stdout))
            .unwrap_or(0);
        Ok(DeviceInfo {
            display_width,
            display_height,
            sdk,
        })
    }

    fn dump_hierarchy(&self) -> Result<String, AppError> {
        let bytes = self
            .runner
            .exec_out_bytes(&["uiautomator", "dump", "/dev/tty"], DUMP_TIMEOUT)?;
        let raw = String::from_utf8_lossy(&bytes);
        let start = raw.find("<?xml").or_else(|| raw.find("<hierarchy")).ok_or_else(|| {
            AppError::dependency("uiautomator dump returned no hierarchy", self.trace_id())
        })?;
        let end = raw
            .rfind(HIERARCHY_END)
            .map(|index| index + HIERARCHY_END.len())
            .unwrap_or(raw.len());
        Ok(raw[start..end].to_string())
    }

    fn click(&self, at: Point) -> Result<(), AppError> {
        let (x, y) = (at.x.to_string(), at.y.to_string());
        self.shell_checked(&["input", "tap", &x, &y], "input tap")?;
        Ok(())
    }

    fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), AppError> {
        let ms = duration.as_millis().max(1).to_string();
        let coords = [
            from.x.to_string(),
            from.y.to_string(),
            to.x.to_string(),
            to.y.to_string(),
        ];
        self.shell_checked(
            &["input", "swipe", &coords[0], &coords[1], &coords[2], &coords[3], &ms],
            "input swipe",
        )?;
        Ok(())
    }

    fn press_key(&self, keycode: &str) -> Result<(), AppError> {
        self.shell_checked(&["input", "keyevent", keycode], "input keyevent")?;
        Ok(())
    }

    fn input_text(&self, chunk: &str) -> Result<(), AppError> {
        if chunk.is_empty() {
            return Ok(());
        }
        if chunk.chars().all(is_shell_typable) {
            let escaped = escape_input_text(chunk);
            self.shell_checked(&["input", "text", &escaped], "input text")?;
        } else {
            // ADB keyboard IME path; handles emoji and any other non-ASCII text.
            let payload = STANDARD.encode(chunk.as_bytes());
            self.shell_checked(
                &["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &payload],
                "ADB keyboard broadcast",
            )?;
        }
        Ok(())
    }

    fn current_package(&self) -> Result<Option<String>, AppError> {
        let output = self.runner.shell(&["dumpsys", "window"])?;
        Ok(parse_focused_package(&output.stdout))
    }

    fn app_start(&self, package: &str, stop_first: bool) -> Result<(), AppError> {
        let component = self.resolve_launcher_activity(package)?;
        let mut command = vec!["am", "start"];
        if stop_first {
            command.push("-S");
        }
        command.extend(["-n", component.as_str()]);
        let output = self.shell_checked(&command, "am start")?;
        if output.stdout.contains("Error:") || output.stderr.contains("Error:") {
            return Err(AppError::dependency(
                format!("am start rejected {component}: {}", output.stdout.trim()),
                self.trace_id(),
            ));
        }
        debug!(trace_id = %self.trace_id(), component = %component, stop_first, "app_start");
        Ok(())
    }

    fn app_stop(&self, package: &str) -> Result<(), AppError> {
        self.shell_checked(&["am", "force-stop", package], "am force-stop")?;
        Ok(())
    }

    fn shell(&self, command: &[&str]) -> Result<CommandOutput, AppError> {
        self.runner.shell(command)
    }

    fn push(&self, local: &Path, remote: &str) -> Result<(), AppError> {
        let local = local.to_string_lossy().to_string();
        let output = self
            .runner
            .run(&["push", local.as_str(), remote], PUSH_TIMEOUT)?;
        ensure_success(&output, "adb push", self.trace_id())
    }

    fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        self.runner
            .exec_out_bytes(&["screencap", "-p"], SCREENSHOT_TIMEOUT)
    }
}

pub struct AdbConnector {
    program: String,
}

impl AdbConnector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DeviceConnector for AdbConnector {
    fn connect(&self, serial: &str, trace_id: &str) -> Result<Arc<dyn Device>, AppError> {
        if serial.trim().is_empty() {
            return Err(AppError::validation("device_id is required", trace_id));
        }
        let output = run_command_with_timeout(
            &self.program,
            &["devices".to_string(), "-l".to_string()],
            SHELL_TIMEOUT,
            trace_id,
        )?;
        let devices = parse_adb_devices(&output.stdout);
        match devices.iter().find(|device| device.serial == serial) {
            Some(device) if device.state == "device" => {}
            Some(device) => {
                return Err(AppError::device(
                    format!("Device {serial} is {}", device.state),
                    trace_id,
                ))
            }
            None => {
                return Err(AppError::device(
                    format!("Device {serial} is not attached"),
                    trace_id,
                ))
            }
        }
        Ok(Arc::new(AdbDevice::new(&self.program, serial, trace_id)))
    }
}

fn is_shell_typable(ch: char) -> bool {
    (ch.is_ascii_graphic() || ch == ' ') && ch != '%'
}

/// Escapes text for `input text`, which runs through the device shell.
pub fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        match ch {
            ' ' => escaped.push_str("%s"),
            '\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*'
            | '?' | '~' | '#' | '[' | ']' | '{' | '}' | '!' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}
