use serde::Serialize;
use std::fmt;

pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_DEPENDENCY: &str = "ERR_DEPENDENCY";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";
pub const ERR_DEVICE: &str = "ERR_DEVICE";
pub const ERR_CONFIG: &str = "ERR_CONFIG";

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DEPENDENCY, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    /// Transport-level failure: the device is gone, offline or unauthorized.
    pub fn device(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DEVICE, message, trace_id)
    }

    pub fn config(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_CONFIG, message, trace_id)
    }

    pub fn is_device_failure(&self) -> bool {
        self.code == ERR_DEVICE
    }

    /// Human label written into record-store status fields.
    pub fn kind_label(&self) -> &'static str {
        match self.code.as_str() {
            ERR_VALIDATION => "Validation Error",
            ERR_DEPENDENCY => "Service Error",
            ERR_DEVICE => "Device Error",
            ERR_CONFIG => "Config Error",
            _ => "System Error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
