use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;
use crate::app::ui::xpath;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SwipeIntensity {
    Gentle,
    #[default]
    Normal,
    Strong,
}

/// Interaction cadence for warmup browsing. Read-only after load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScrollerSettings {
    /// Label ("after_like", "before_scroll", ...) to a `[lo, hi]` range in seconds.
    pub delays: HashMap<String, [f64; 2]>,
    pub watch_time_range: [f64; 2],
    pub like_probability: f64,
    pub comment_probability: f64,
    pub percent_reels_to_watch: f64,
    pub idle_after_actions: [u32; 2],
    pub idle_duration_range: [f64; 2],
    pub max_scrolls: u32,
    pub max_runtime_seconds: u64,
    pub keywords: Vec<String>,
    pub swipe_intensity: SwipeIntensity,
    pub comment_pool: Vec<String>,
}

impl Default for ScrollerSettings {
    fn default() -> Self {
        let delays = [
            ("after_like", [0.8, 2.0]),
            ("before_scroll", [0.6, 1.8]),
            ("after_comment", [1.5, 3.5]),
            ("after_search", [2.0, 4.0]),
            ("after_open_reel", [1.0, 2.5]),
            ("between_actions", [0.4, 1.2]),
        ]
        .into_iter()
        .map(|(label, range)| (label.to_string(), range))
        .collect();
        Self {
            delays,
            watch_time_range: [4.0, 12.0],
            like_probability: 0.35,
            comment_probability: 0.1,
            percent_reels_to_watch: 0.8,
            idle_after_actions: [8, 15],
            idle_duration_range: [10.0, 25.0],
            max_scrolls: 30,
            max_runtime_seconds: 900,
            keywords: vec!["model".to_string()],
            swipe_intensity: SwipeIntensity::Normal,
            comment_pool: Vec::new(),
        }
    }
}

impl ScrollerSettings {
    pub fn delay_range(&self, label: &str) -> [f64; 2] {
        self.delays.get(label).copied().unwrap_or([0.5, 1.5])
    }
}

/// One declarative popup rule. Exactly one of `button_xpath` / `callback` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PopupRule {
    pub name: String,
    pub text_xpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    pub temp_dir: Option<PathBuf>,
    pub frames_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenBands {
    /// Fraction-of-height range a "scroll up" starts in.
    pub upper: [f64; 2],
    /// Fraction-of-height range a "scroll up" ends in.
    pub lower: [f64; 2],
    pub horizontal: [f64; 2],
}

impl Default for ScreenBands {
    fn default() -> Self {
        Self {
            upper: [0.2, 0.35],
            lower: [0.65, 0.8],
            horizontal: [0.35, 0.65],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    /// Popup supervisor tick before scaling.
    pub watcher_tick_ms: u64,
    /// Multiplier for every humanized sleep and workflow deadline.
    pub time_scale: f64,
    pub screen_bands: ScreenBands,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            watcher_tick_ms: 1000,
            time_scale: 1.0,
            screen_bands: ScreenBands::default(),
        }
    }
}

impl EngineSettings {
    pub fn scaled(&self, secs: f64) -> Duration {
        Duration::from_secs_f64((secs * self.time_scale).max(0.0))
    }

    /// Scaled supervisor tick, never below 10 ms so the worker cannot spin.
    pub fn watcher_tick(&self) -> Duration {
        self.scaled(self.watcher_tick_ms as f64 / 1000.0)
            .max(Duration::from_millis(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaunchSettings {
    /// Activity used by the activity-manager launch strategy, e.g. `com.instagram.mainactivity.MainActivity`.
    pub main_activity: Option<String>,
    pub backoff_ms: u64,
    pub max_retries: u32,
    pub readiness_timeout_secs: u64,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            main_activity: Some("com.instagram.mainactivity.InstagramMainActivity".to_string()),
            backoff_ms: 1500,
            max_retries: 3,
            readiness_timeout_secs: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoginSettings {
    pub code_attempts: u32,
    pub code_retry_delay_secs: u64,
    pub human_code_prompt: bool,
    pub detect_timeout_secs: u64,
    pub final_verify_timeout_secs: u64,
    pub imap_host: Option<String>,
    pub imap_port: u16,
    pub imap_timeout_secs: u64,
    pub vpn_package: Option<String>,
    /// Source app of the "generate a new identity" notification; unset skips the reset.
    pub identity_package: Option<String>,
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            code_attempts: 5,
            code_retry_delay_secs: 15,
            human_code_prompt: false,
            detect_timeout_secs: 45,
            final_verify_timeout_secs: 30,
            imap_host: None,
            imap_port: 993,
            imap_timeout_secs: 30,
            vpn_package: None,
            identity_package: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PostingSettings {
    pub verify_timeout_secs: u64,
    pub next_retry_interval_secs: u64,
    pub next_max_total_secs: u64,
    pub next_max_clicks: u32,
    pub caption_similarity: f64,
    pub caption_attempts: u32,
    /// Screenshots of the chosen video handed to the caption model; 0 sends the prompt alone.
    pub caption_frames: usize,
}

impl Default for PostingSettings {
    fn default() -> Self {
        Self {
            verify_timeout_secs: 180,
            next_retry_interval_secs: 4,
            next_max_total_secs: 80,
            next_max_clicks: 20,
            caption_similarity: 0.9,
            caption_attempts: 2,
            caption_frames: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub scroller: ScrollerSettings,
    /// `None` arms the catalog's built-in rule list.
    #[serde(default)]
    pub popups: Option<Vec<PopupRule>>,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub launch: LaunchSettings,
    #[serde(default)]
    pub login: LoginSettings,
    #[serde(default)]
    pub posting: PostingSettings,
    #[serde(default)]
    pub reel_id_prefix: Option<String>,
    #[serde(default)]
    pub catalog_overrides: HashMap<String, String>,
}

impl AppConfig {
    pub fn temp_dir(&self, project_root: &Path) -> PathBuf {
        self.paths
            .temp_dir
            .clone()
            .unwrap_or_else(|| project_root.join("temp"))
    }

    pub fn frames_dir(&self, project_root: &Path) -> PathBuf {
        self.paths
            .frames_dir
            .clone()
            .unwrap_or_else(|| project_root.join("frames"))
    }
}

pub fn config_path(project_root: &Path) -> PathBuf {
    if let Ok(path) = std::env::var("REEL_PILOT_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    project_root.join(DEFAULT_CONFIG_FILE)
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::config(format!("Failed to read config: {err}"), ""))?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<AppConfig, AppError> {
    let config: AppConfig = if raw.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(raw)
            .map_err(|err| AppError::config(format!("Failed to parse config: {err}"), ""))?
    };
    if let Some(rules) = &config.popups {
        validate_popup_rules(rules)?;
    }
    Ok(validate_config(config))
}

/// Structural checks: unique names, exactly one action, compilable locators.
pub fn validate_popup_rules(rules: &[PopupRule]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(AppError::config("Popup rule with empty name", ""));
        }
        if !seen.insert(rule.name.as_str()) {
            return Err(AppError::config(
                format!("Duplicate popup rule name: {}", rule.name),
                "",
            ));
        }
        match (&rule.button_xpath, &rule.callback) {
            (Some(_), None) | (None, Some(_)) => {}
            (Some(_), Some(_)) => {
                return Err(AppError::config(
                    format!("Popup rule {} sets both button_xpath and callback", rule.name),
                    "",
                ))
            }
            (None, None) => {
                return Err(AppError::config(
                    format!("Popup rule {} has neither button_xpath nor callback", rule.name),
                    "",
                ))
            }
        }
        for locator in std::iter::once(&rule.text_xpath).chain(rule.button_xpath.iter()) {
            xpath::compile(locator).map_err(|err| {
                AppError::config(format!("Popup rule {}: {err}", rule.name), "")
            })?;
        }
    }
    Ok(())
}

fn valid_range(range: [f64; 2], min: f64) -> bool {
    range[0].is_finite() && range[1].is_finite() && range[0] >= min && range[0] <= range[1]
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = ScrollerSettings::default();
    let scroller = &mut config.scroller;
    scroller.delays.retain(|_, range| valid_range(*range, 0.0));
    if !valid_range(scroller.watch_time_range, 0.0) {
        scroller.watch_time_range = defaults.watch_time_range;
    }
    if !(0.0..=1.0).contains(&scroller.like_probability) {
        scroller.like_probability = defaults.like_probability;
    }
    if !(0.0..=1.0).contains(&scroller.comment_probability) {
        scroller.comment_probability = defaults.comment_probability;
    }
    if !(0.0..=1.0).contains(&scroller.percent_reels_to_watch) {
        scroller.percent_reels_to_watch = defaults.percent_reels_to_watch;
    }
    if scroller.idle_after_actions[0] == 0 || scroller.idle_after_actions[0] > scroller.idle_after_actions[1] {
        scroller.idle_after_actions = defaults.idle_after_actions;
    }
    if !valid_range(scroller.idle_duration_range, 0.0) {
        scroller.idle_duration_range = defaults.idle_duration_range;
    }
    if scroller.max_scrolls == 0 {
        scroller.max_scrolls = defaults.max_scrolls;
    }
    if scroller.max_runtime_seconds == 0 {
        scroller.max_runtime_seconds = defaults.max_runtime_seconds;
    }
    scroller.keywords.retain(|keyword| !keyword.trim().is_empty());
    if scroller.keywords.is_empty() {
        scroller.keywords = defaults.keywords;
    }
    scroller.comment_pool.retain(|comment| !comment.trim().is_empty());

    let engine = &mut config.engine;
    if engine.poll_interval_ms < 50 {
        engine.poll_interval_ms = 500;
    }
    if engine.watcher_tick_ms < 100 {
        engine.watcher_tick_ms = 1000;
    }
    if !engine.time_scale.is_finite() || engine.time_scale < 0.0 {
        engine.time_scale = 1.0;
    }
    let bands = &mut engine.screen_bands;
    let bands_ok = [bands.upper, bands.lower, bands.horizontal]
        .iter()
        .all(|band| valid_range(*band, 0.0) && band[1] <= 1.0)
        && bands.upper[1] < bands.lower[0];
    if !bands_ok {
        *bands = ScreenBands::default();
    }

    if config.launch.max_retries == 0 {
        config.launch.max_retries = 3;
    }
    if config.launch.readiness_timeout_secs == 0 {
        config.launch.readiness_timeout_secs = 25;
    }
    if config.login.code_attempts == 0 {
        config.login.code_attempts = 5;
    }
    if config.login.detect_timeout_secs == 0 {
        config.login.detect_timeout_secs = 45;
    }
    if config.login.final_verify_timeout_secs == 0 {
        config.login.final_verify_timeout_secs = 30;
    }
    if config.login.imap_port == 0 {
        config.login.imap_port = 993;
    }
    if config.login.imap_timeout_secs == 0 {
        config.login.imap_timeout_secs = 30;
    }
    if config.posting.verify_timeout_secs == 0 {
        config.posting.verify_timeout_secs = 180;
    }
    if config.posting.next_retry_interval_secs == 0 {
        config.posting.next_retry_interval_secs = 4;
    }
    if config.posting.next_max_total_secs == 0 {
        config.posting.next_max_total_secs = 80;
    }
    if config.posting.next_max_clicks == 0 {
        config.posting.next_max_clicks = 20;
    }
    if !(0.0..=1.0).contains(&config.posting.caption_similarity) {
        config.posting.caption_similarity = 0.9;
    }
    if config.posting.caption_attempts == 0 {
        config.posting.caption_attempts = 2;
    }
    config
}
