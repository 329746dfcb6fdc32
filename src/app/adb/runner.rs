use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::app::error::AppError;

pub const SHELL_TIMEOUT: Duration = Duration::from_secs(10);
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(600);

const TRANSPORT_FAILURE_MARKERS: &[&str] = &[
    "device offline",
    "no devices/emulators found",
    "device unauthorized",
    "not found",
    "connection reset",
    "closed",
    "cannot connect",
];

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let bytes = run_command_bytes(program, args, timeout, trace_id)?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&bytes.stdout).to_string(),
        stderr: String::from_utf8_lossy(&bytes.stderr).to_string(),
        exit_code: bytes.exit_code,
    })
}

pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
}

/// Like [`run_command_with_timeout`] but keeps stdout as bytes (screencap PNGs).
pub fn run_command_bytes(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<RawOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::device(format!("Failed to spawn {program}: {err}"), trace_id))?;

    // Drain stdout/stderr in parallel; a chatty child (uiautomator dump, screencap) blocks once
    // the pipe buffer fills and we would incorrectly hit the timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;

    let stdout_handle = std::thread::spawn(move || drain(stdout));
    let stderr_handle = std::thread::spawn(move || drain(stderr));

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::device(
                        format!("{program} timed out after {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    Ok(RawOutput {
        stdout: stdout_handle.join().unwrap_or_default(),
        stderr: stderr_handle.join().unwrap_or_default(),
        exit_code,
    })
}

fn drain(mut reader: impl Read) -> Vec<u8> {
    let mut buffer = Vec::<u8>::new();
    let mut temp = [0u8; 4096];
    loop {
        match reader.read(&mut temp) {
            Ok(0) => break,
            Ok(count) => buffer.extend_from_slice(&temp[..count]),
            Err(_) => break,
        }
    }
    buffer
}

/// Serial-scoped adb invocation: every call is prefixed with `-s <serial>`.
#[derive(Debug, Clone)]
pub struct AdbRunner {
    program: String,
    serial: String,
    trace_id: String,
}

impl AdbRunner {
    pub fn new(program: impl Into<String>, serial: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            serial: serial.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn args<S: AsRef<str>>(&self, tail: &[S]) -> Vec<String> {
        let mut args = vec!["-s".to_string(), self.serial.clone()];
        args.extend(tail.iter().map(|item| item.as_ref().to_string()));
        args
    }

    pub fn run<S: AsRef<str>>(&self, tail: &[S], timeout: Duration) -> Result<CommandOutput, AppError> {
        let output = run_command_with_timeout(&self.program, &self.args(tail), timeout, &self.trace_id)?;
        if !output.success() {
            if let Some(err) = classify_transport_failure(&output.stderr, &self.trace_id) {
                return Err(err);
            }
        }
        Ok(output)
    }

    pub fn shell<S: AsRef<str>>(&self, command: &[S]) -> Result<CommandOutput, AppError> {
        let mut tail = vec!["shell".to_string()];
        tail.extend(command.iter().map(|item| item.as_ref().to_string()));
        self.run(&tail, SHELL_TIMEOUT)
    }

    pub fn exec_out_bytes<S: AsRef<str>>(&self, command: &[S], timeout: Duration) -> Result<Vec<u8>, AppError> {
        let mut tail = vec!["exec-out".to_string()];
        tail.extend(command.iter().map(|item| item.as_ref().to_string()));
        let raw = run_command_bytes(&self.program, &self.args(&tail), timeout, &self.trace_id)?;
        if raw.exit_code != Some(0) {
            let stderr = String::from_utf8_lossy(&raw.stderr).to_string();
            if let Some(err) = classify_transport_failure(&stderr, &self.trace_id) {
                return Err(err);
            }
            return Err(AppError::dependency(
                format!("exec-out {} failed: {}", tail[1], stderr.trim()),
                &self.trace_id,
            ));
        }
        Ok(raw.stdout)
    }
}

/// Returns a device error when stderr indicates the transport itself is broken.
pub fn classify_transport_failure(stderr: &str, trace_id: &str) -> Option<AppError> {
    let lowered = stderr.to_lowercase();
    if !lowered.starts_with("adb:") && !lowered.contains("error: device") && !lowered.contains("error: no devices") {
        return None;
    }
    TRANSPORT_FAILURE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
        .then(|| AppError::device(stderr.trim().to_string(), trace_id))
}

/// Fails with a dependency error when a shell command exited non-zero.
pub fn ensure_success(output: &CommandOutput, what: &str, trace_id: &str) -> Result<(), AppError> {
    if output.success() {
        return Ok(());
    }
    Err(AppError::dependency(
        format!(
            "{what} failed (exit {:?}): {}",
            output.exit_code,
            output.stderr.trim()
        ),
        trace_id,
    ))
}
