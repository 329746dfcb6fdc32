//! Step boundaries shared by the workflows: cancellation checks and one log line per transition.

use std::fmt;

use tracing::{error, info, warn};

use crate::app::error::AppError;
use crate::app::state::{cause_persisted_by_watcher, CancelFlag};

#[derive(Debug, Clone)]
pub enum StepFailure {
    /// The cancellation flag was observed at a boundary.
    Aborted { step: String, before: bool, cause: Option<String> },
    /// The step ran and did not reach its goal.
    Failed { step: String, reason: String },
    /// An error no step-level retry can fix (device gone, broken config).
    Fatal { step: String, error: AppError },
}

impl StepFailure {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            step: String::new(),
            reason: reason.into(),
        }
    }

    pub fn step(&self) -> &str {
        match self {
            Self::Aborted { step, .. } | Self::Failed { step, .. } | Self::Fatal { step, .. } => step,
        }
    }

    fn with_step(self, label: &str) -> Self {
        match self {
            Self::Failed { step, reason } if step.is_empty() => Self::Failed {
                step: label.to_string(),
                reason,
            },
            Self::Fatal { step, error } if step.is_empty() => Self::Fatal {
                step: label.to_string(),
                error,
            },
            other => other,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Aborted { step, before: false, .. } => {
                format!("Aborted: critical failure detected during {step}")
            }
            Self::Aborted { step, before: true, .. } => {
                format!("Aborted: critical failure detected before {step}")
            }
            Self::Failed { reason, .. } => reason.clone(),
            Self::Fatal { error, .. } => format!("{}: {}", error.kind_label(), error.error),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Short category for status strings; details belong in the notes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Aborted { .. } => "Aborted",
            Self::Failed { .. } => "Step Failed",
            Self::Fatal { error, .. } => error.kind_label(),
        }
    }

    /// Cause recorded on the cancellation flag, for aborted runs.
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Aborted { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// Aborted by a watcher that already wrote the record status.
    pub fn persisted_by_watcher(&self) -> bool {
        self.is_aborted() && cause_persisted_by_watcher(self.cause())
    }

    /// Reason plus the cancellation cause, for the record's notes.
    pub fn notes(&self) -> String {
        match self.cause() {
            Some(cause) => format!("{} ({cause})", self.reason()),
            None => self.reason(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

impl From<AppError> for StepFailure {
    fn from(error: AppError) -> Self {
        Self::Fatal {
            step: String::new(),
            error,
        }
    }
}

pub type StepResult<T> = Result<T, StepFailure>;

/// Runs named steps in order; the cancellation flag is read on entry and on exit of each.
pub struct StepRunner {
    workflow: &'static str,
    cancel: CancelFlag,
    trace_id: String,
    record_id: String,
}

impl StepRunner {
    pub fn new(workflow: &'static str, cancel: CancelFlag, trace_id: &str, record_id: &str) -> Self {
        Self {
            workflow,
            cancel,
            trace_id: trace_id.to_string(),
            record_id: record_id.to_string(),
        }
    }

    pub fn cancel(&self) -> &CancelFlag {
        &self.cancel
    }

    fn aborted(&self, label: &str, before: bool) -> StepFailure {
        let failure = StepFailure::Aborted {
            step: label.to_string(),
            before,
            cause: self.cancel.cause(),
        };
        warn!(
            trace_id = %self.trace_id,
            workflow = self.workflow,
            record_id = %self.record_id,
            step = %label,
            result = "fatal",
            cause = ?self.cancel.cause(),
            "🚫 {}", failure.reason()
        );
        failure
    }

    pub fn run<T>(&self, label: &str, step: impl FnOnce() -> StepResult<T>) -> StepResult<T> {
        if self.cancel.is_set() {
            return Err(self.aborted(label, true));
        }
        let outcome = step();
        if self.cancel.is_set() {
            return Err(self.aborted(label, false));
        }
        match outcome {
            Ok(value) => {
                info!(
                    trace_id = %self.trace_id,
                    workflow = self.workflow,
                    record_id = %self.record_id,
                    step = %label,
                    result = "success",
                    "✅ step complete"
                );
                Ok(value)
            }
            Err(failure) => {
                let failure = failure.with_step(label);
                error!(
                    trace_id = %self.trace_id,
                    workflow = self.workflow,
                    record_id = %self.record_id,
                    step = %label,
                    result = "fatal",
                    reason = %failure.reason(),
                    "❌ step failed"
                );
                Err(failure)
            }
        }
    }

    /// Logs a recoverable in-step retry.
    pub fn retry(&self, label: &str, attempt: u32, reason: &str) {
        warn!(
            trace_id = %self.trace_id,
            workflow = self.workflow,
            record_id = %self.record_id,
            step = %label,
            result = "retry",
            attempt,
            reason = %reason,
            "⚠️ retrying"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn flag_set_during_a_step_aborts_at_its_boundary() {
        let cancel = CancelFlag::new();
        let runner = StepRunner::new("post_reel", cancel.clone(), "t1", "rec1");
        let result: StepResult<()> = runner.run("app launch", || {
            cancel.trip("account suspended");
            Ok(())
        });
        let failure = result.err().expect("aborted");
        assert_eq!(failure.reason(), "Aborted: critical failure detected during app launch");
        assert!(failure.is_aborted());
    }

    #[test]
    fn later_steps_do_not_run_after_abort() {
        let cancel = CancelFlag::new();
        cancel.trip("interrupted");
        let runner = StepRunner::new("post_reel", cancel, "t1", "rec1");
        let ran = Cell::new(false);
        let result: StepResult<()> = runner.run("media push", || {
            ran.set(true);
            Ok(())
        });
        assert!(!ran.get());
        assert_eq!(result.err().expect("aborted").reason(), "Aborted: critical failure detected before media push");
    }

    #[test]
    fn only_watcher_aborts_count_as_already_persisted() {
        let suspended = CancelFlag::new();
        suspended.trip(crate::app::state::CAUSE_SUSPENDED);
        let runner = StepRunner::new("post_reel", suspended, "t1", "rec1");
        let failure = runner.run("app launch", || Ok(())).err().expect("aborted");
        assert!(failure.persisted_by_watcher());

        let interrupted = CancelFlag::new();
        interrupted.trip(crate::app::state::CAUSE_INTERRUPTED);
        let runner = StepRunner::new("post_reel", interrupted, "t1", "rec1");
        let failure = runner.run("app launch", || Ok(())).err().expect("aborted");
        assert!(!failure.persisted_by_watcher());
        assert_eq!(failure.kind(), "Aborted");
        assert_eq!(failure.notes(), "Aborted: critical failure detected before app launch (interrupted)");

        let failed = StepFailure::failed("Download failed");
        assert!(!failed.persisted_by_watcher());
        assert_eq!(failed.notes(), "Download failed");
        assert_eq!(StepFailure::from(AppError::device("gone", "t1")).kind(), "Device Error");
    }

    #[test]
    fn failures_carry_their_step_label() {
        let runner = StepRunner::new("post_reel", CancelFlag::new(), "t1", "rec1");
        let failed: StepResult<()> = runner.run("media download", || Err(StepFailure::failed("Download failed")));
        let failed = failed.err().expect("failed");
        assert_eq!(failed.step(), "media download");
        assert_eq!(failed.reason(), "Download failed");

        let fatal: StepResult<()> = runner.run("app launch", || Err(AppError::device("device 'D1' offline", "t1").into()));
        assert_eq!(fatal.err().expect("fatal").reason(), "Device Error: device 'D1' offline");
    }
}
