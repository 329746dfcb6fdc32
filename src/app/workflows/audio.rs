//! Attaching a trending track to the reel in the editor.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use regex::Regex;
use tracing::{info, warn};

use crate::app::config::PostingSettings;
use crate::app::models::TrackInfo;
use crate::app::ui::catalog::Loc;
use crate::app::ui::engine::UiEngine;

const TRENDING_ATTEMPTS: u32 = 3;
const SHEET_EXPAND_FRACTION: f64 = -0.9;

fn track_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?P<title>.+?) by (?P<artist>[^,]+),\s*(?P<reels>[^,]+?)(?:\s+reels?)?\s*,\s*(?P<duration>[^,]+?)\s*$").ok()
        })
        .as_ref()
}

/// Splits `"<title> by <artist>,<reel count>,<duration>"`; anything else keeps only `raw`.
pub fn parse_track_description(description: &str) -> TrackInfo {
    let raw = description.trim().to_string();
    let body = raw.strip_prefix("Select track ").unwrap_or(&raw).trim();
    match track_pattern().and_then(|re| re.captures(body)) {
        Some(caps) => {
            let field = |name: &str| caps.name(name).map(|m| m.as_str().trim().to_string());
            TrackInfo {
                title: field("title"),
                artist: field("artist"),
                reel_count: field("reels"),
                duration: field("duration"),
                raw,
            }
        }
        None => TrackInfo {
            raw,
            ..TrackInfo::default()
        },
    }
}

/// Open the audio browser, pick a random track, trim it, confirm and leave the editor.
pub fn add_audio(engine: &UiEngine, posting: &PostingSettings) -> Result<TrackInfo, String> {
    let trace_id = engine.trace_id().to_string();
    if !engine.click_loc(Loc::AddAudioButton, Duration::from_secs(10)) {
        return Err("Failed to click Add audio".to_string());
    }
    engine.pacer().sleep_between(1.0, 2.0);

    let trending = engine.loc(Loc::TrendingTab).to_string();
    let mut trending_clicked = false;
    for attempt in 1..=TRENDING_ATTEMPTS {
        if engine.click_if_exists(&trending, Duration::from_secs(3)) {
            trending_clicked = true;
            break;
        }
        warn!(trace_id = %trace_id, attempt, "⚠️ Trending tab not clickable yet");
        engine.pacer().sleep_between(0.5, 1.0);
    }

    for handle in [Loc::DragHandle, Loc::DragHandleAlt] {
        let locator = engine.loc(handle).to_string();
        if engine.element_exists(&locator) && engine.drag_element_vertically(&locator, SHEET_EXPAND_FRACTION) {
            engine.pacer().sleep_between(0.5, 1.0);
            break;
        }
    }

    let rows_locator = engine.loc(Loc::TrackRow).to_string();
    if !engine.wait_for_element_appear(&rows_locator, Duration::from_secs(10), None) {
        return Err("No audio tracks listed".to_string());
    }
    let rows = engine.find_all(&rows_locator);
    let Some(row) = rows.choose(&mut rand::thread_rng()).cloned() else {
        return Err("No audio tracks listed".to_string());
    };
    let description = if row.content_desc.is_empty() { &row.text } else { &row.content_desc };
    let track = parse_track_description(description);
    if !engine.click_element(&row) {
        return Err("Failed to select audio track".to_string());
    }
    info!(trace_id = %trace_id, track = %track.raw, "track selected");

    if trending_clicked && !engine.click_loc(Loc::SelectSoundButton, Duration::from_secs(5)) {
        warn!(trace_id = %trace_id, "⚠️ Select Sound not shown, continuing");
    }

    let scrubber = engine.loc(Loc::AudioScrubber).to_string();
    if !engine.wait_for_element_appear(&scrubber, Duration::from_secs(10), None) {
        return Err("Audio scrubber did not appear".to_string());
    }
    match engine.scrub_element(&scrubber) {
        Some(steps) => info!(trace_id = %trace_id, steps, "audio scrubbed"),
        None => warn!(trace_id = %trace_id, "⚠️ scrub gesture failed, keeping default segment"),
    }

    if !engine.click_loc(Loc::DoneButton, Duration::from_secs(10)) {
        return Err("Failed to click Done".to_string());
    }
    engine.pacer().sleep_between(1.0, 2.0);

    advance_past_editor(engine, posting)?;
    Ok(track)
}

/// Clicks Next until it vanishes, bounded by a click count and a total time budget.
fn advance_past_editor(engine: &UiEngine, posting: &PostingSettings) -> Result<(), String> {
    let next = engine.loc(Loc::NextButton).to_string();
    let interval = Duration::from_secs(posting.next_retry_interval_secs);
    let budget = engine.pacer().scale(Duration::from_secs(posting.next_max_total_secs));
    let timed = engine.pacer().time_scale() > 0.0;
    let started = Instant::now();
    let mut clicks = 0u32;
    while clicks < posting.next_max_clicks && !(timed && started.elapsed() >= budget) {
        if engine.click_if_exists(&next, Duration::from_secs(5)) {
            clicks += 1;
        }
        if engine.wait_for_element_vanish(&next, interval, None) {
            info!(trace_id = %engine.trace_id(), clicks, "✅ left the editor");
            return Ok(());
        }
    }
    warn!(trace_id = %engine.trace_id(), clicks, "⚠️ Next never vanished");
    Err(format!("Next button stuck after {clicks} clicks"))
}
