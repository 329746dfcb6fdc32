use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const STATUS_LOGGED_IN: &str = "Logged In - Active";
pub const STATUS_BANNED: &str = "Banned";
pub const STATUS_WARMUP_DONE: &str = "Warmup Done";
pub const STATUS_LOGIN_INCORRECT_PW: &str = "Login Failed - Incorrect PW";
pub const STATUS_LOGIN_UNKNOWN: &str = "Login Failed - Unknown State";
pub const STATUS_POSTED: &str = "Posted";
pub const STATUS_POST_FAILED: &str = "Error - Post Failed";
pub const STATUS_SOMETHING_WRONG: &str = "Something Went Wrong";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub transport_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub display_width: i32,
    pub display_height: i32,
    pub sdk: u32,
}

/// One account/task row as read from the record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskRow {
    pub record_id: String,
    /// Account row the task belongs to, when the row lives in a content table.
    #[serde(default)]
    pub account_record_id: Option<String>,
    #[serde(default)]
    pub instagram_username: String,
    #[serde(default)]
    pub instagram_password: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub email_password: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub media_url: String,
    #[serde(default)]
    pub scheduled_for: Option<NaiveDate>,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub posted: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub song: String,
    #[serde(default)]
    pub post_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
}

impl TaskRow {
    /// Record that receives account-level status (ban, login state).
    pub fn account_id(&self) -> &str {
        self.account_record_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.record_id)
    }

    pub fn missing_fields(&self, required: &[&'static str]) -> Vec<&'static str> {
        required
            .iter()
            .copied()
            .filter(|field| match *field {
                "instagram_username" => self.instagram_username.trim().is_empty(),
                "instagram_password" => self.instagram_password.is_empty(),
                "email_address" => self.email_address.trim().is_empty(),
                "email_password" => self.email_password.is_empty(),
                "package_name" => self.package_name.trim().is_empty(),
                "device_id" => self.device_id.trim().is_empty(),
                "media_url" => self.media_url.trim().is_empty(),
                _ => false,
            })
            .collect()
    }
}

/// Typed partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logged_in: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Parsed content-description of an audio track row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub reel_count: Option<String>,
    pub duration: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub local_path: PathBuf,
    pub mime: String,
    pub file_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WarmupSummary {
    pub keyword: String,
    pub total_reels_processed: u32,
    pub total_liked: u32,
    pub comment_interactions: u32,
    pub scrolls: u32,
    pub idle_breaks: u32,
    pub elapsed_secs: f64,
    pub aborted: bool,
}
