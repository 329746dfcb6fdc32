use regex::Regex;

use crate::app::models::DeviceSummary;

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let mut model = None;
            let mut transport_id = None;
            for token in tokens.iter().skip(2) {
                if let Some(value) = token.strip_prefix("model:") {
                    model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    transport_id = Some(value.to_string());
                }
            }
            Some(DeviceSummary {
                serial: tokens[0].to_string(),
                state: tokens[1].to_string(),
                model,
                transport_id,
            })
        })
        .collect()
}

/// `wm size` prints the physical size and, when set, an override which wins.
pub fn parse_wm_size(output: &str) -> Option<(i32, i32)> {
    let mut physical = None;
    let mut override_size = None;
    for line in output.lines() {
        let trimmed = line.trim();
        let Some((label, value)) = trimmed.split_once(':') else {
            continue;
        };
        let Some((w, h)) = value.trim().split_once('x') else {
            continue;
        };
        let (Ok(w), Ok(h)) = (w.trim().parse::<i32>(), h.trim().parse::<i32>()) else {
            continue;
        };
        if label.to_lowercase().contains("override") {
            override_size = Some((w, h));
        } else {
            physical = Some((w, h));
        }
    }
    override_size.or(physical)
}

/// Extracts the focused package from `dumpsys window` output.
pub fn parse_focused_package(output: &str) -> Option<String> {
    let re = Regex::new(r"(?:mCurrentFocus|mFocusedApp)=.*?\s([A-Za-z0-9_.]+)/[A-Za-z0-9_.$]+").ok()?;
    for line in output.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with("mCurrentFocus") && !trimmed.starts_with("mFocusedApp") {
            continue;
        }
        if let Some(caps) = re.captures(trimmed) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// `cmd package resolve-activity --brief <pkg>` ends with `pkg/activity`.
pub fn parse_resolved_activity(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains('/') && !line.contains(' '))
        .last()
        .map(str::to_string)
}

pub fn parse_sdk_level(output: &str) -> Option<u32> {
    output.lines().map(str::trim).find_map(|line| line.parse().ok())
}
