use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::services::caption_gen::CaptionGenerator;
use crate::app::ui::catalog::Loc;
use crate::app::ui::engine::UiEngine;
use crate::app::ui::similarity::caption_similarity;

/// Finds the caption field, types a generated caption and reads it back.
///
/// `frames` are screenshots of the video, passed through to the generator.
///
/// Succeeds only when the on-screen text is at least `threshold` similar to what
/// was typed; keyboards drop or reorder emoji often enough that exact equality
/// is the wrong test.
pub fn compose_caption(
    engine: &UiEngine,
    generator: &dyn CaptionGenerator,
    frames: &[PathBuf],
    threshold: f64,
) -> Result<String, String> {
    let primary = engine.loc(Loc::CaptionInput).to_string();
    let alternate = engine.loc(Loc::CaptionInputAlt).to_string();
    let field = if engine.wait_for_element_appear(&primary, Duration::from_secs(10), None) {
        primary
    } else if engine.wait_for_element_appear(&alternate, Duration::from_secs(5), None) {
        alternate
    } else {
        return Err("Caption field not found".to_string());
    };

    if !engine.click_by_locator(&field, Duration::from_secs(5)) {
        return Err("Caption field not clickable".to_string());
    }
    let caption = generator
        .generate_with_frames(frames)
        .map_err(|err| format!("Caption generation failed: {}", err.error))?;

    if !engine.input_text(&field, &caption, true, Duration::from_secs(5)) {
        return Err("Typing caption failed".to_string());
    }
    engine.pacer().sleep_between(0.5, 1.2);
    engine.press_back();
    engine.pacer().sleep_between(0.5, 1.0);

    let on_screen = engine.get_element_text(&field).unwrap_or_default();
    let score = caption_similarity(&caption, &on_screen);
    if score >= threshold {
        info!(trace_id = %engine.trace_id(), similarity = score, "✅ caption verified");
        Ok(caption)
    } else {
        warn!(
            trace_id = %engine.trace_id(),
            similarity = score,
            expected = %caption,
            actual = %on_screen,
            "⚠️ caption mismatch"
        );
        Err(format!("Caption verification failed (similarity {score:.2})"))
    }
}
