use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Local, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::app::error::AppError;
use crate::app::models::{RecordUpdate, TaskRow, STATUS_SOMETHING_WRONG};
use crate::app::services::record_store::{append_note, parse_cell_date, RecordStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS records (
    record_id TEXT PRIMARY KEY,
    account_record_id TEXT,
    view TEXT NOT NULL DEFAULT '',
    instagram_username TEXT NOT NULL DEFAULT '',
    instagram_password TEXT NOT NULL DEFAULT '',
    email_address TEXT NOT NULL DEFAULT '',
    email_password TEXT NOT NULL DEFAULT '',
    package_name TEXT NOT NULL DEFAULT '',
    device_id TEXT NOT NULL DEFAULT '',
    media_url TEXT NOT NULL DEFAULT '',
    scheduled_for TEXT,
    logged_in INTEGER NOT NULL DEFAULT 0,
    posted INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT '',
    caption TEXT NOT NULL DEFAULT '',
    song TEXT NOT NULL DEFAULT '',
    post_timestamp TEXT,
    notes TEXT NOT NULL DEFAULT ''
);";

const COLUMNS: &str = "record_id, account_record_id, instagram_username, instagram_password, \
    email_address, email_password, package_name, device_id, media_url, scheduled_for, \
    logged_in, posted, status, caption, song, post_timestamp, notes";

/// Local record store with the same contract as the Airtable one.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let connection = Connection::open(path)
            .map_err(|err| AppError::system(format!("Failed to open record store: {err}"), ""))?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let connection = Connection::open_in_memory()
            .map_err(|err| AppError::system(format!("Failed to open record store: {err}"), ""))?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self, AppError> {
        connection
            .execute_batch(SCHEMA)
            .map_err(|err| AppError::system(format!("Failed to initialize record store: {err}"), ""))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AppError> {
        self.connection
            .lock()
            .map_err(|_| AppError::system("Record store lock poisoned", ""))
    }

    /// Inserts or replaces a row; `view` groups rows the way an Airtable view does.
    pub fn upsert(&self, row: &TaskRow, view: &str) -> Result<(), AppError> {
        let connection = self.lock()?;
        connection
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO records ({COLUMNS}, view)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                ),
                params![
                    row.record_id,
                    row.account_record_id,
                    row.instagram_username,
                    row.instagram_password,
                    row.email_address,
                    row.email_password,
                    row.package_name,
                    row.device_id,
                    row.media_url,
                    row.scheduled_for.map(|date| date.format("%Y-%m-%d").to_string()),
                    row.logged_in,
                    row.posted,
                    row.status,
                    row.caption,
                    row.song,
                    row.post_timestamp.map(|ts| ts.to_rfc3339()),
                    row.notes,
                    view,
                ],
            )
            .map_err(|err| AppError::system(format!("Failed to write record: {err}"), ""))?;
        Ok(())
    }

    fn query(&self, clause: &str, values: Vec<rusqlite::types::Value>) -> Result<Vec<TaskRow>, AppError> {
        let connection = self.lock()?;
        let sql = format!("SELECT {COLUMNS} FROM records {clause}");
        let mut stmt = connection
            .prepare(&sql)
            .map_err(|err| AppError::system(format!("Failed to prepare record query: {err}"), ""))?;
        let rows_iter = stmt
            .query_map(params_from_iter(values.iter()), row_to_task)
            .map_err(|err| AppError::system(format!("Failed to execute record query: {err}"), ""))?;
        let mut rows = Vec::new();
        for row in rows_iter {
            rows.push(row.map_err(|err| AppError::system(format!("Failed to read record: {err}"), ""))?);
        }
        Ok(rows)
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    let scheduled: Option<String> = row.get(9)?;
    let timestamp: Option<String> = row.get(15)?;
    Ok(TaskRow {
        record_id: row.get(0)?,
        account_record_id: row.get(1)?,
        instagram_username: row.get(2)?,
        instagram_password: row.get(3)?,
        email_address: row.get(4)?,
        email_password: row.get(5)?,
        package_name: row.get(6)?,
        device_id: row.get(7)?,
        media_url: row.get(8)?,
        scheduled_for: scheduled.as_deref().and_then(parse_cell_date),
        logged_in: row.get(10)?,
        posted: row.get(11)?,
        status: row.get(12)?,
        caption: row.get(13)?,
        song: row.get(14)?,
        post_timestamp: timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc)),
        notes: row.get(16)?,
    })
}

impl RecordStore for SqliteStore {
    fn fetch_one_active(&self, view_id: &str) -> Result<Option<TaskRow>, AppError> {
        let rows = self.query(
            "WHERE view = ?1 ORDER BY record_id LIMIT 1",
            vec![view_id.to_string().into()],
        )?;
        Ok(rows.into_iter().next())
    }

    fn fetch_unused(&self, limit: usize) -> Result<Vec<TaskRow>, AppError> {
        self.query(
            "WHERE logged_in = 0 AND status = '' ORDER BY record_id LIMIT ?1",
            vec![(limit.max(1) as i64).into()],
        )
    }

    fn fetch_today_unposted(&self, limit: usize) -> Result<Vec<TaskRow>, AppError> {
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        self.query(
            "WHERE scheduled_for = ?1 AND posted = 0 ORDER BY record_id LIMIT ?2",
            vec![today.into(), (limit.max(1) as i64).into()],
        )
    }

    fn fetch_by_id(&self, record_id: &str) -> Result<Option<TaskRow>, AppError> {
        let connection = self.lock()?;
        connection
            .query_row(
                &format!("SELECT {COLUMNS} FROM records WHERE record_id = ?1"),
                params![record_id],
                row_to_task,
            )
            .optional()
            .map_err(|err| AppError::system(format!("Failed to read record: {err}"), ""))
    }

    fn update(&self, record_id: &str, update: &RecordUpdate) -> Result<bool, AppError> {
        if record_id.trim().is_empty() {
            return Err(AppError::validation("record_id is required", ""));
        }
        let mut sets = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        let mut push = |column: &str, value: rusqlite::types::Value| {
            values.push(value);
            sets.push(format!("{column} = ?{}", values.len()));
        };
        if let Some(logged_in) = update.logged_in {
            push("logged_in", i64::from(logged_in).into());
        }
        if let Some(status) = &update.status {
            push("status", status.clone().into());
        }
        if let Some(posted) = update.posted {
            push("posted", i64::from(posted).into());
        }
        if let Some(caption) = &update.caption {
            push("caption", caption.clone().into());
        }
        if let Some(song) = &update.song {
            push("song", song.clone().into());
        }
        if let Some(timestamp) = &update.post_timestamp {
            push("post_timestamp", timestamp.to_rfc3339().into());
        }
        if let Some(notes) = &update.notes {
            push("notes", notes.clone().into());
        }
        if sets.is_empty() {
            return Ok(true);
        }
        values.push(record_id.to_string().into());
        let sql = format!(
            "UPDATE records SET {} WHERE record_id = ?{}",
            sets.join(", "),
            values.len()
        );
        let connection = self.lock()?;
        let changed = connection
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(|err| AppError::system(format!("Failed to update record: {err}"), ""))?;
        Ok(changed > 0)
    }

    fn mark_something_wrong_and_rotate(&self, record_id: &str) -> Result<bool, AppError> {
        let Some(existing) = self.fetch_by_id(record_id)? else {
            return Ok(false);
        };
        let note = format!(
            "{} at {}: rotated out of schedule",
            STATUS_SOMETHING_WRONG,
            Utc::now().to_rfc3339()
        );
        let connection = self.lock()?;
        let changed = connection
            .execute(
                "UPDATE records SET status = ?1, scheduled_for = NULL, notes = ?2 WHERE record_id = ?3",
                params![STATUS_SOMETHING_WRONG, append_note(&existing.notes, &note), record_id],
            )
            .map_err(|err| AppError::system(format!("Failed to rotate record: {err}"), ""))?;
        Ok(changed > 0)
    }
}
