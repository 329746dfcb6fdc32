use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::app::error::AppError;

pub const AIRTABLE_API_KEY: &str = "AIRTABLE_API_KEY";
pub const AIRTABLE_ACCOUNTS_BASE_ID: &str = "AIRTABLE_ACCOUNTS_BASE_ID";
pub const AIRTABLE_ACCOUNTS_TABLE: &str = "AIRTABLE_ACCOUNTS_TABLE";
pub const AIRTABLE_CONTENT_BASE_ID: &str = "AIRTABLE_CONTENT_BASE_ID";
pub const AIRTABLE_ACTIVE_VIEW: &str = "AIRTABLE_ACTIVE_VIEW";
pub const GOOGLE_DRIVE_CREDENTIALS: &str = "GOOGLE_DRIVE_CREDENTIALS";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const EMAIL_ACTIVATION_URL: &str = "EMAIL_ACTIVATION_URL";
pub const ADB_PATH: &str = "ADB_PATH";
pub const RECORD_STORE_SQLITE: &str = "RECORD_STORE_SQLITE";

const KNOWN_KEYS: &[&str] = &[
    AIRTABLE_API_KEY,
    AIRTABLE_ACCOUNTS_BASE_ID,
    AIRTABLE_ACCOUNTS_TABLE,
    AIRTABLE_CONTENT_BASE_ID,
    AIRTABLE_ACTIVE_VIEW,
    GOOGLE_DRIVE_CREDENTIALS,
    OPENAI_API_KEY,
    OPENAI_MODEL,
    EMAIL_ACTIVATION_URL,
    ADB_PATH,
    RECORD_STORE_SQLITE,
];

/// Snapshot of the recognized keys, taken once at startup.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
}

impl Secrets {
    /// Reads `<project_root>/.env` when present; the process environment wins over the file.
    pub fn load(project_root: &Path) -> Self {
        let env_path = project_root.join(".env");
        if env_path.exists() {
            match dotenvy::from_path(&env_path) {
                Ok(()) => debug!(path = %env_path.display(), "loaded .env"),
                Err(err) => warn!(path = %env_path.display(), error = %err, "⚠️ failed to read .env"),
            }
        }
        let values = KNOWN_KEYS
            .iter()
            .filter_map(|key| {
                std::env::var(key)
                    .ok()
                    .filter(|value| !value.trim().is_empty())
                    .map(|value| (key.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { values }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .filter(|(_, value)| !value.trim().is_empty())
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Fails with one `ERR_CONFIG` naming every missing key.
    pub fn require(&self, keys: &[&str]) -> Result<(), AppError> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|key| !self.values.contains_key(*key))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(AppError::config(
            format!("Missing required environment keys: {}", missing.join(", ")),
            "",
        ))
    }

    pub fn value(&self, key: &str) -> Result<&str, AppError> {
        self.get(key)
            .ok_or_else(|| AppError::config(format!("Missing required environment key: {key}"), ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_lists_every_missing_key() {
        let secrets = Secrets::from_pairs(&[(OPENAI_API_KEY, "sk-1"), (AIRTABLE_API_KEY, "  ")]);
        let err = secrets
            .require(&[OPENAI_API_KEY, AIRTABLE_API_KEY, AIRTABLE_ACCOUNTS_BASE_ID])
            .expect_err("missing keys");
        assert_eq!(err.code, crate::app::error::ERR_CONFIG);
        assert!(err.error.contains("AIRTABLE_API_KEY, AIRTABLE_ACCOUNTS_BASE_ID"));
        assert!(secrets.require(&[OPENAI_API_KEY]).is_ok());
    }

    #[test]
    fn value_reads_present_keys() {
        let secrets = Secrets::from_pairs(&[(OPENAI_MODEL, "gpt-4o-mini")]);
        assert_eq!(secrets.value(OPENAI_MODEL).expect("model"), "gpt-4o-mini");
        assert!(secrets.value(ADB_PATH).is_err());
    }

    #[test]
    fn load_reads_dotenv_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".env"), "EMAIL_ACTIVATION_URL=https://activate.example\n")
            .expect("write env");
        let secrets = Secrets::load(dir.path());
        assert_eq!(secrets.get(EMAIL_ACTIVATION_URL), Some("https://activate.example"));
    }
}
