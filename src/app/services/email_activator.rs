use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::app::error::AppError;

/// Server-side activation drives a headless browser; allow it time.
const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl ActivationResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.status.to_ascii_lowercase().as_str(), "ok" | "success" | "enabled" | "activated")
    }
}

/// Enables IMAP/POP access for a mailbox through an external service.
pub trait EmailActivator: Send + Sync {
    fn activate(&self, email: &str, password: &str) -> Result<ActivationResult, AppError>;
}

pub struct HttpEmailActivator {
    client: Client,
    endpoint: String,
    trace_id: String,
}

impl HttpEmailActivator {
    pub fn new(endpoint: &str, trace_id: &str) -> Result<Self, AppError> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(AppError::config(
                format!("EMAIL_ACTIVATION_URL must be an http(s) url, got {endpoint:?}"),
                trace_id,
            ));
        }
        let client = Client::builder()
            .timeout(ACTIVATION_TIMEOUT)
            .build()
            .map_err(|err| AppError::system(format!("Failed to build HTTP client: {err}"), trace_id))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            trace_id: trace_id.to_string(),
        })
    }
}

impl EmailActivator for HttpEmailActivator {
    fn activate(&self, email: &str, password: &str) -> Result<ActivationResult, AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .map_err(|err| AppError::dependency(format!("Email activation request failed: {err}"), &self.trace_id))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AppError::dependency(
                format!("Email activation returned {status}: {body}"),
                &self.trace_id,
            ));
        }
        let result: ActivationResult = response.json().map_err(|err| {
            AppError::dependency(format!("Email activation returned invalid JSON: {err}"), &self.trace_id)
        })?;
        info!(trace_id = %self.trace_id, status = %result.status, message = %result.message, "email activation finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_endpoints() {
        assert!(HttpEmailActivator::new("ftp://x", "t1").is_err());
        assert!(HttpEmailActivator::new("https://activate.example/api", "t1").is_ok());
    }

    #[test]
    fn parses_partial_results() {
        let result: ActivationResult = serde_json::from_str(r#"{"status": "Success"}"#).expect("json");
        assert!(result.succeeded());
        assert_eq!(result.message, "");
        let failed: ActivationResult = serde_json::from_str(r#"{"status": "error", "message": "captcha"}"#).expect("json");
        assert!(!failed.succeeded());
    }
}
