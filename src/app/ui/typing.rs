use std::sync::Arc;

use rand::Rng;
use unicode_segmentation::UnicodeSegmentation;

use crate::app::adb::device::{Device, KEY_DEL, KEY_ENTER, KEY_MOVE_END};
use crate::app::error::AppError;
use crate::app::ui::gestures::{random_between, Pacer};

const KEY_DELAY: [f64; 2] = [0.05, 0.22];
const THINK_PAUSE: [f64; 2] = [0.3, 0.9];
const THINK_PROBABILITY: f64 = 0.06;

/// Per-grapheme text injection with randomized inter-key delays.
pub struct StealthTyper {
    device: Arc<dyn Device>,
    pacer: Pacer,
}

impl StealthTyper {
    pub fn new(device: Arc<dyn Device>, pacer: Pacer) -> Self {
        Self { device, pacer }
    }

    /// Types `text` one grapheme cluster at a time; emoji sequences stay intact.
    /// Returns the number of clusters sent. Empty input sends nothing.
    pub fn type_text(&self, text: &str) -> Result<usize, AppError> {
        let mut sent = 0;
        for cluster in text.graphemes(true) {
            if cluster == "\n" || cluster == "\r\n" {
                self.press_enter()?;
            } else {
                self.device.input_text(cluster)?;
            }
            sent += 1;
            self.pacer.sleep_between(KEY_DELAY[0], KEY_DELAY[1]);
            if rand::thread_rng().gen_bool(THINK_PROBABILITY) {
                self.pacer.sleep_secs(random_between(THINK_PAUSE[0], THINK_PAUSE[1]));
            }
        }
        Ok(sent)
    }

    pub fn press_enter(&self) -> Result<(), AppError> {
        self.device.press_key(KEY_ENTER)
    }

    /// Moves the cursor to the end and deletes `count` characters.
    pub fn clear(&self, count: usize) -> Result<(), AppError> {
        if count == 0 {
            return Ok(());
        }
        self.device.press_key(KEY_MOVE_END)?;
        for _ in 0..count {
            self.device.press_key(KEY_DEL)?;
            self.pacer.sleep_between(0.01, 0.04);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{Action, FakeDevice};

    fn typer(device: Arc<FakeDevice>) -> StealthTyper {
        StealthTyper::new(device, Pacer::new(0.0))
    }

    #[test]
    fn empty_string_is_a_noop() {
        let device = Arc::new(FakeDevice::new("D1"));
        assert_eq!(typer(device.clone()).type_text("").expect("type"), 0);
        assert!(device.actions().is_empty());
    }

    #[test]
    fn emoji_clusters_are_sent_whole() {
        let device = Arc::new(FakeDevice::new("D1"));
        let text = "hi 👩‍💻!";
        let sent = typer(device.clone()).type_text(text).expect("type");
        assert_eq!(sent, 5);
        let chunks: Vec<String> = device
            .actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Text(chunk) => Some(chunk),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["h", "i", " ", "👩‍💻", "!"]);
        assert_eq!(device.typed(), text);
    }

    #[test]
    fn newline_becomes_enter_key() {
        let device = Arc::new(FakeDevice::new("D1"));
        typer(device.clone()).type_text("a\nb").expect("type");
        assert!(device.actions().contains(&Action::Key(KEY_ENTER.to_string())));
        assert_eq!(device.typed(), "ab");
    }

    #[test]
    fn clear_deletes_from_the_end() {
        let device = Arc::new(FakeDevice::new("D1"));
        device.set_typed("hello");
        typer(device.clone()).clear(3).expect("clear");
        assert_eq!(device.typed(), "he");
        assert_eq!(device.actions().first(), Some(&Action::Key(KEY_MOVE_END.to_string())));
    }
}
