use std::path::Path;

use tracing::debug;

use crate::app::error::AppError;

/// Accepts values pasted into `.env` with surrounding quotes.
fn unquote(value: &str) -> &str {
    let trimmed = value.trim();
    ['"', '\'']
        .iter()
        .find_map(|quote| {
            trimmed
                .strip_prefix(*quote)
                .and_then(|inner| inner.strip_suffix(*quote))
        })
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Picks the adb binary: the `ADB_PATH` secret when set, `adb` from `PATH` otherwise.
///
/// An explicit path must name an existing file so a typo fails at startup
/// instead of surfacing as "device not attached" on the first run.
pub fn resolve_adb_program(configured: Option<&str>, trace_id: &str) -> Result<String, AppError> {
    let program = configured.map(unquote).filter(|value| !value.is_empty());
    let Some(program) = program else {
        return Ok("adb".to_string());
    };
    let path = Path::new(program);
    if path.is_dir() {
        return Err(AppError::config(
            format!("ADB_PATH must point to the adb executable, not a directory: {program}"),
            trace_id,
        ));
    }
    if !path.exists() {
        return Err(AppError::config(
            format!("ADB_PATH does not exist: {program}"),
            trace_id,
        ));
    }
    debug!(trace_id = %trace_id, program = %program, "using configured adb");
    Ok(program.to_string())
}
