use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::app::error::AppError;
use crate::app::ui::capture::png_bytes_to_data_url;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Instagram rejects longer captions.
pub const MAX_CAPTION_CHARS: usize = 2200;
const MAX_FRAMES: usize = 4;

const DEFAULT_PROMPT: &str = "Write one short, casual Instagram Reel caption (under 120 characters) \
with one or two fitting emoji and at most three hashtags. Reply with the caption only.";

pub trait CaptionGenerator: Send + Sync {
    /// A short caption, possibly with emoji. Never empty on `Ok`.
    fn generate(&self) -> Result<String, AppError>;

    /// Same contract, with screenshots of the video for generators that can look at them.
    fn generate_with_frames(&self, frames: &[PathBuf]) -> Result<String, AppError> {
        let _ = frames;
        self.generate()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Strips wrapping quotes and labels the model sometimes adds, and caps the length.
pub fn clean_caption(raw: &str) -> String {
    let mut caption = raw.trim();
    for prefix in ["Caption:", "caption:"] {
        if let Some(rest) = caption.strip_prefix(prefix) {
            caption = rest.trim();
        }
    }
    let caption = caption
        .trim_matches(|ch| ch == '"' || ch == '\u{201C}' || ch == '\u{201D}')
        .trim();
    caption.chars().take(MAX_CAPTION_CHARS).collect()
}

pub struct OpenAiCaptionGenerator {
    client: Client,
    api_key: String,
    model: String,
    prompt: String,
    trace_id: String,
}

impl OpenAiCaptionGenerator {
    pub fn new(api_key: &str, model: Option<&str>, trace_id: &str) -> Result<Self, AppError> {
        if api_key.trim().is_empty() {
            return Err(AppError::config("OPENAI_API_KEY is required", trace_id));
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| AppError::system(format!("Failed to build HTTP client: {err}"), trace_id))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model
                .filter(|model| !model.trim().is_empty())
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            trace_id: trace_id.to_string(),
        })
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = prompt.to_string();
        self
    }

    /// The prompt alone, or the prompt followed by up to four frames as image parts.
    fn user_content(&self, frames: &[PathBuf]) -> Value {
        let images: Vec<Value> = frames
            .iter()
            .take(MAX_FRAMES)
            .filter_map(|path| match fs::read(path) {
                Ok(bytes) => match png_bytes_to_data_url(&bytes) {
                    Ok(url) => Some(json!({"type": "image_url", "image_url": {"url": url, "detail": "low"}})),
                    Err(err) => {
                        warn!(trace_id = %self.trace_id, frame = %path.display(), error = %err, "⚠️ skipping frame");
                        None
                    }
                },
                Err(err) => {
                    warn!(trace_id = %self.trace_id, frame = %path.display(), error = %err, "⚠️ unreadable frame");
                    None
                }
            })
            .collect();
        if images.is_empty() {
            return Value::String(self.prompt.clone());
        }
        let mut parts = vec![json!({"type": "text", "text": self.prompt})];
        parts.extend(images);
        Value::Array(parts)
    }
}

impl CaptionGenerator for OpenAiCaptionGenerator {
    fn generate(&self) -> Result<String, AppError> {
        self.generate_with_frames(&[])
    }

    fn generate_with_frames(&self, frames: &[PathBuf]) -> Result<String, AppError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![json!({"role": "user", "content": self.user_content(frames)})],
            max_tokens: 120,
            temperature: 0.9,
        };
        debug!(trace_id = %self.trace_id, model = %self.model, frames = frames.len().min(MAX_FRAMES), "requesting caption");
        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|err| AppError::dependency(format!("Caption request failed: {err}"), &self.trace_id))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AppError::dependency(
                format!("Caption API returned {status}: {body}"),
                &self.trace_id,
            ));
        }
        let parsed: ChatResponse = response
            .json()
            .map_err(|err| AppError::dependency(format!("Caption API returned invalid JSON: {err}"), &self.trace_id))?;
        let raw = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let caption = clean_caption(&raw);
        if caption.is_empty() {
            return Err(AppError::dependency("Caption generation returned empty text", &self.trace_id));
        }
        info!(trace_id = %self.trace_id, caption = %caption, "caption generated");
        Ok(caption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_caption_strips_quotes_and_labels() {
        assert_eq!(clean_caption("  \"Sunset mood 🌅 #golden\"  "), "Sunset mood 🌅 #golden");
        assert_eq!(clean_caption("Caption: hello world"), "hello world");
        assert_eq!(clean_caption("   "), "");
        assert_eq!(clean_caption(&"a".repeat(3000)).chars().count(), MAX_CAPTION_CHARS);
    }

    #[test]
    fn requires_api_key() {
        assert!(OpenAiCaptionGenerator::new(" ", None, "t1").is_err());
    }

    #[test]
    fn frames_become_image_parts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = dir.path().join("frame_000.png");
        let bad = dir.path().join("frame_001.png");
        std::fs::write(&good, b"\x89PNG\r\n\x1a\nxx").expect("write");
        std::fs::write(&bad, b"nope").expect("write");
        let generator = OpenAiCaptionGenerator::new("sk-test", Some(""), "t1").expect("generator");
        assert_eq!(generator.model, DEFAULT_MODEL);
        let content = generator.user_content(&[good, bad, dir.path().join("missing.png")]);
        let parts = content.as_array().expect("multipart content");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["type"], "image_url");
        assert!(parts[1]["image_url"]["url"].as_str().unwrap_or("").starts_with("data:image/png;base64,"));
    }

    #[test]
    fn text_only_prompt_without_frames() {
        let generator = OpenAiCaptionGenerator::new("sk-test", None, "t1")
            .expect("generator")
            .with_prompt("Say hi");
        assert_eq!(generator.user_content(&[]), Value::String("Say hi".to_string()));
    }
}
