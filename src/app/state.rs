use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::app::services::record_store::RecordStore;

/// Cause tripped by the suspension watcher after it has marked the account banned.
pub const CAUSE_SUSPENDED: &str = "account suspended";
/// Cause tripped by the error-toast watcher; it rotates the record itself.
pub const CAUSE_SOMETHING_WRONG: &str = "something went wrong";
pub const CAUSE_INTERRUPTED: &str = "interrupted";

/// Whether the watcher that tripped `cause` already wrote the record status.
pub fn cause_persisted_by_watcher(cause: Option<&str>) -> bool {
    matches!(cause, Some(CAUSE_SUSPENDED | CAUSE_SOMETHING_WRONG))
}

struct CancelInner {
    tripped: AtomicBool,
    cause: Mutex<Option<String>>,
}

/// One-way abort signal shared by the workflow thread and the watcher thread.
#[derive(Clone)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                tripped: AtomicBool::new(false),
                cause: Mutex::new(None),
            }),
        }
    }

    /// Sets the flag; only the first caller's cause is kept. Returns whether this call set it.
    pub fn trip(&self, cause: impl Into<String>) -> bool {
        let first = !self.inner.tripped.swap(true, Ordering::SeqCst);
        if first {
            if let Ok(mut guard) = self.inner.cause.lock() {
                *guard = Some(cause.into());
            }
        }
        first
    }

    pub fn is_set(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    pub fn cause(&self) -> Option<String> {
        self.inner.cause.lock().ok().and_then(|guard| guard.clone())
    }
}

impl std::fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelFlag")
            .field("set", &self.is_set())
            .field("cause", &self.cause())
            .finish()
    }
}

/// Context bag handed to watcher callbacks.
#[derive(Clone)]
pub struct WatchContext {
    pub record_id: String,
    /// Row that receives account-level status such as a ban.
    pub account_record_id: String,
    pub username: String,
    pub package: String,
    pub trace_id: String,
    /// Store holding `record_id` (content table for posts, account table for logins).
    pub record_store: Option<Arc<dyn RecordStore>>,
    /// Store scoped to the account table.
    pub account_store: Option<Arc<dyn RecordStore>>,
    pub cancel: CancelFlag,
    fired: Arc<Mutex<HashSet<String>>>,
}

impl WatchContext {
    pub fn new(package: &str, trace_id: &str, cancel: CancelFlag) -> Self {
        Self {
            record_id: String::new(),
            account_record_id: String::new(),
            username: String::new(),
            package: package.to_string(),
            trace_id: trace_id.to_string(),
            record_store: None,
            account_store: None,
            cancel,
            fired: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// True the first time `key` is seen in this run; later calls return false.
    pub fn first_time(&self, key: &str) -> bool {
        match self.fired.lock() {
            Ok(mut fired) => fired.insert(key.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(key.to_string()),
        }
    }

    pub fn with_record(mut self, record_id: &str, account_record_id: &str, username: &str) -> Self {
        self.record_id = record_id.to_string();
        self.account_record_id = account_record_id.to_string();
        self.username = username.to_string();
        self
    }

    /// Account role only; callbacks that act on a content record skip the write.
    pub fn with_account_store(mut self, account_store: Arc<dyn RecordStore>) -> Self {
        self.account_store = Some(account_store);
        self
    }

    pub fn with_stores(
        mut self,
        record_store: Arc<dyn RecordStore>,
        account_store: Arc<dyn RecordStore>,
    ) -> Self {
        self.record_store = Some(record_store);
        self.account_store = Some(account_store);
        self
    }
}
