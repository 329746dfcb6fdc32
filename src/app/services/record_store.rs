use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use reqwest::blocking::Client;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::models::{RecordUpdate, TaskRow, STATUS_BANNED, STATUS_SOMETHING_WRONG};

const AIRTABLE_API: &str = "https://api.airtable.com/v0";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Airtable column names.
pub mod fields {
    pub const ACCOUNT: &str = "Account";
    pub const USERNAME: &str = "Instagram Username";
    pub const PASSWORD: &str = "Instagram Password";
    pub const EMAIL: &str = "Email";
    pub const EMAIL_PASSWORD: &str = "Email Password";
    pub const PACKAGE: &str = "Package Name";
    pub const DEVICE: &str = "Device ID";
    pub const MEDIA_URL: &str = "Drive URL";
    pub const SCHEDULED_FOR: &str = "Scheduled For";
    pub const LOGGED_IN: &str = "Logged In?";
    pub const POSTED: &str = "Posted?";
    pub const STATUS: &str = "Status";
    pub const CAPTION: &str = "Caption";
    pub const SONG: &str = "Song";
    pub const POST_TIMESTAMP: &str = "Post Timestamp";
    pub const NOTES: &str = "Notes";
}

/// Row source and sink for accounts and scheduled content.
pub trait RecordStore: Send + Sync {
    fn fetch_one_active(&self, view_id: &str) -> Result<Option<TaskRow>, AppError>;
    fn fetch_unused(&self, limit: usize) -> Result<Vec<TaskRow>, AppError>;
    fn fetch_today_unposted(&self, limit: usize) -> Result<Vec<TaskRow>, AppError>;
    fn fetch_by_id(&self, record_id: &str) -> Result<Option<TaskRow>, AppError>;
    fn update(&self, record_id: &str, update: &RecordUpdate) -> Result<bool, AppError>;
    /// Flags the row "Something Went Wrong" and unschedules it so another row takes its slot.
    fn mark_something_wrong_and_rotate(&self, record_id: &str) -> Result<bool, AppError>;
}

/// Collapses list-valued cells (linked-record lookups) to their first scalar.
pub fn flatten_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => items.iter().find_map(flatten_cell),
        Value::Object(map) => map
            .get("url")
            .or_else(|| map.get("name"))
            .or_else(|| map.get("id"))
            .and_then(flatten_cell),
    }
}

fn cell_string(fields: &Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(flatten_cell)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

fn cell_bool(fields: &Map<String, Value>, name: &str) -> bool {
    match fields.get(name) {
        Some(Value::Bool(flag)) => *flag,
        Some(other) => flatten_cell(other)
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "checked"))
            .unwrap_or(false),
        None => false,
    }
}

pub fn parse_cell_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

pub fn row_from_record(record: &Value) -> Option<TaskRow> {
    let record_id = record.get("id")?.as_str()?.to_string();
    let empty = Map::new();
    let fields = record.get("fields").and_then(Value::as_object).unwrap_or(&empty);
    let account = cell_string(fields, fields::ACCOUNT);
    Some(TaskRow {
        record_id,
        account_record_id: (!account.is_empty()).then_some(account),
        instagram_username: cell_string(fields, fields::USERNAME),
        instagram_password: fields
            .get(fields::PASSWORD)
            .and_then(flatten_cell)
            .unwrap_or_default(),
        email_address: cell_string(fields, fields::EMAIL),
        email_password: fields
            .get(fields::EMAIL_PASSWORD)
            .and_then(flatten_cell)
            .unwrap_or_default(),
        package_name: cell_string(fields, fields::PACKAGE),
        device_id: cell_string(fields, fields::DEVICE),
        media_url: cell_string(fields, fields::MEDIA_URL),
        scheduled_for: parse_cell_date(&cell_string(fields, fields::SCHEDULED_FOR)),
        logged_in: cell_bool(fields, fields::LOGGED_IN),
        posted: cell_bool(fields, fields::POSTED),
        status: cell_string(fields, fields::STATUS),
        caption: cell_string(fields, fields::CAPTION),
        song: cell_string(fields, fields::SONG),
        post_timestamp: DateTime::parse_from_rfc3339(&cell_string(fields, fields::POST_TIMESTAMP))
            .ok()
            .map(|value| value.with_timezone(&Utc)),
        notes: cell_string(fields, fields::NOTES),
    })
}

pub fn update_fields(update: &RecordUpdate) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(logged_in) = update.logged_in {
        out.insert(fields::LOGGED_IN.to_string(), json!(logged_in));
    }
    if let Some(status) = &update.status {
        out.insert(fields::STATUS.to_string(), json!(status));
    }
    if let Some(posted) = update.posted {
        out.insert(fields::POSTED.to_string(), json!(posted));
    }
    if let Some(caption) = &update.caption {
        out.insert(fields::CAPTION.to_string(), json!(caption));
    }
    if let Some(song) = &update.song {
        out.insert(fields::SONG.to_string(), json!(song));
    }
    if let Some(timestamp) = &update.post_timestamp {
        out.insert(fields::POST_TIMESTAMP.to_string(), json!(timestamp.to_rfc3339()));
    }
    if let Some(notes) = &update.notes {
        out.insert(fields::NOTES.to_string(), json!(notes));
    }
    out
}

pub fn append_note(existing: &str, note: &str) -> String {
    let existing = existing.trim();
    if existing.is_empty() {
        note.to_string()
    } else {
        format!("{existing}\n{note}")
    }
}

/// Airtable REST client bound to one base/table pair.
#[derive(Clone)]
pub struct AirtableStore {
    client: Client,
    api_key: String,
    base_id: String,
    table: String,
    trace_id: String,
}

impl AirtableStore {
    pub fn new(api_key: &str, base_id: &str, table: &str, trace_id: &str) -> Result<Self, AppError> {
        if api_key.trim().is_empty() || base_id.trim().is_empty() || table.trim().is_empty() {
            return Err(AppError::config(
                "Airtable api key, base and table are required",
                trace_id,
            ));
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| AppError::system(format!("Failed to build HTTP client: {err}"), trace_id))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_id: base_id.to_string(),
            table: table.to_string(),
            trace_id: trace_id.to_string(),
        })
    }

    /// Same credentials, different base/table (e.g. the account table for ban updates).
    pub fn scoped(&self, base_id: &str, table: &str) -> Self {
        Self {
            base_id: base_id.to_string(),
            table: table.to_string(),
            ..self.clone()
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn table_url(&self) -> String {
        format!("{AIRTABLE_API}/{}/{}", self.base_id, self.table)
    }

    fn list(&self, query: &[(&str, String)]) -> Result<Vec<TaskRow>, AppError> {
        let response = self
            .client
            .get(self.table_url())
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .map_err(|err| AppError::dependency(format!("Airtable request failed: {err}"), &self.trace_id))?;
        let payload = self.read_json(response)?;
        Ok(payload
            .get("records")
            .and_then(Value::as_array)
            .map(|records| records.iter().filter_map(row_from_record).collect())
            .unwrap_or_default())
    }

    fn read_json(&self, response: reqwest::blocking::Response) -> Result<Value, AppError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AppError::dependency(
                format!("Airtable returned {status}: {body}"),
                &self.trace_id,
            ));
        }
        response
            .json::<Value>()
            .map_err(|err| AppError::dependency(format!("Airtable returned invalid JSON: {err}"), &self.trace_id))
    }

    fn patch(&self, record_id: &str, payload: Map<String, Value>) -> Result<bool, AppError> {
        if record_id.trim().is_empty() {
            return Err(AppError::validation("record_id is required", &self.trace_id));
        }
        if payload.is_empty() {
            return Ok(true);
        }
        let response = self
            .client
            .patch(format!("{}/{record_id}", self.table_url()))
            .bearer_auth(&self.api_key)
            .json(&json!({ "fields": payload, "typecast": true }))
            .send()
            .map_err(|err| AppError::dependency(format!("Airtable update failed: {err}"), &self.trace_id))?;
        let status = response.status();
        if !status.is_success() {
            warn!(
                trace_id = %self.trace_id,
                record_id = %record_id,
                status = %status,
                "⚠️ Airtable update rejected"
            );
            return Ok(false);
        }
        Ok(true)
    }
}

impl RecordStore for AirtableStore {
    fn fetch_one_active(&self, view_id: &str) -> Result<Option<TaskRow>, AppError> {
        let rows = self.list(&[
            ("view", view_id.to_string()),
            ("maxRecords", "1".to_string()),
        ])?;
        Ok(rows.into_iter().next())
    }

    fn fetch_unused(&self, limit: usize) -> Result<Vec<TaskRow>, AppError> {
        let formula = format!("AND(NOT({{{}}}), {{{}}} = '')", fields::LOGGED_IN, fields::STATUS);
        self.list(&[
            ("filterByFormula", formula),
            ("maxRecords", limit.max(1).to_string()),
        ])
    }

    fn fetch_today_unposted(&self, limit: usize) -> Result<Vec<TaskRow>, AppError> {
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let formula = format!(
            "AND(IS_SAME({{{}}}, '{today}', 'day'), NOT({{{}}}))",
            fields::SCHEDULED_FOR,
            fields::POSTED
        );
        self.list(&[
            ("filterByFormula", formula),
            ("maxRecords", limit.max(1).to_string()),
        ])
    }

    fn fetch_by_id(&self, record_id: &str) -> Result<Option<TaskRow>, AppError> {
        let response = self
            .client
            .get(format!("{}/{record_id}", self.table_url()))
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|err| AppError::dependency(format!("Airtable request failed: {err}"), &self.trace_id))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(row_from_record(&self.read_json(response)?))
    }

    fn update(&self, record_id: &str, update: &RecordUpdate) -> Result<bool, AppError> {
        let ok = self.patch(record_id, update_fields(update))?;
        if ok {
            info!(
                trace_id = %self.trace_id,
                record_id = %record_id,
                table = %self.table,
                status = update.status.as_deref().unwrap_or("-"),
                "record updated"
            );
        }
        Ok(ok)
    }

    fn mark_something_wrong_and_rotate(&self, record_id: &str) -> Result<bool, AppError> {
        let existing = self
            .fetch_by_id(record_id)?
            .map(|row| row.notes)
            .unwrap_or_default();
        let note = format!(
            "{} at {}: rotated out of schedule",
            STATUS_SOMETHING_WRONG,
            Utc::now().to_rfc3339()
        );
        let mut payload = Map::new();
        payload.insert(fields::STATUS.to_string(), json!(STATUS_SOMETHING_WRONG));
        payload.insert(fields::SCHEDULED_FOR.to_string(), Value::Null);
        payload.insert(fields::NOTES.to_string(), json!(append_note(&existing, &note)));
        self.patch(record_id, payload)
    }
}

/// Status written when the suspension screen is observed.
pub fn banned_update() -> RecordUpdate {
    RecordUpdate {
        logged_in: Some(false),
        ..RecordUpdate::status(STATUS_BANNED)
    }
}
