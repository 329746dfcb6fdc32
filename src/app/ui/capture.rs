use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::app::adb::device::Device;
use crate::app::error::AppError;
use crate::app::ui::gestures::Pacer;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

pub fn validate_png(bytes: &[u8]) -> Result<(), String> {
    if bytes.len() < PNG_SIGNATURE.len() {
        return Err("Screenshot data is empty".to_string());
    }
    if !bytes.starts_with(PNG_SIGNATURE) {
        return Err("Screenshot data is not a PNG".to_string());
    }
    Ok(())
}

pub fn png_bytes_to_data_url(bytes: &[u8]) -> Result<String, String> {
    validate_png(bytes)?;
    let encoded = STANDARD.encode(bytes);
    Ok(format!("data:image/png;base64,{encoded}"))
}

/// Takes `count` screenshots `interval` apart into `dir` as `frame_000.png`, ...
pub fn capture_frames(
    device: &dyn Device,
    count: usize,
    interval: Duration,
    dir: &Path,
    pacer: Pacer,
    trace_id: &str,
) -> Result<Vec<PathBuf>, AppError> {
    fs::create_dir_all(dir).map_err(|err| {
        AppError::system(format!("Failed to create frames dir {}: {err}", dir.display()), trace_id)
    })?;
    let mut frames = Vec::with_capacity(count);
    for index in 0..count {
        if index > 0 {
            pacer.sleep(interval);
        }
        let bytes = device.screenshot()?;
        validate_png(&bytes).map_err(|err| AppError::dependency(err, trace_id))?;
        let path = dir.join(format!("frame_{index:03}.png"));
        fs::write(&path, &bytes).map_err(|err| {
            AppError::system(format!("Failed to write {}: {err}", path.display()), trace_id)
        })?;
        debug!(trace_id = %trace_id, frame = %path.display(), "captured frame");
        frames.push(path);
    }
    Ok(frames)
}
