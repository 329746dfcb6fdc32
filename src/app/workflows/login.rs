//! Login with optional e-mail 2FA, ending either on the home feed or with a recorded failure.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::app::adb::device::{Device, DeviceConnector};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::models::{
    RecordUpdate, TaskRow, STATUS_LOGGED_IN, STATUS_LOGIN_INCORRECT_PW, STATUS_LOGIN_UNKNOWN,
};
use crate::app::services::email_activator::EmailActivator;
use crate::app::services::identity::IdentityResetter;
use crate::app::services::imap_code::{CodeRequest, CodeRetriever};
use crate::app::services::prompt::CodePrompt;
use crate::app::services::record_store::{banned_update, RecordStore};
use crate::app::services::vpn::VpnRotator;
use crate::app::state::{CancelFlag, WatchContext, CAUSE_SUSPENDED};
use crate::app::ui::catalog::{Loc, XpathCatalog};
use crate::app::ui::engine::UiEngine;
use crate::app::watchers::rules::CallbackRegistry;
use crate::app::watchers::supervisor::PopupSupervisor;
use crate::app::workflows::steps::{StepFailure, StepResult, StepRunner};

const REQUIRED_FIELDS: [&str; 6] = [
    "instagram_username",
    "instagram_password",
    "email_address",
    "email_password",
    "package_name",
    "device_id",
];

/// Terminal state of one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    SuccessNo2fa,
    TwoFactorSuccess,
    /// Sub-reason such as `no_code` or `code_rejected`.
    TwoFactorFailed(String),
    LoginFailed,
    AccountBanned,
    TimeoutOrUnknown,
    /// The run ended on an error: a short kind for the status, the full reason for the notes.
    Error { kind: &'static str, reason: String },
}

impl LoginOutcome {
    pub fn label(&self) -> String {
        match self {
            Self::SuccessNo2fa => "login_success_no_2fa".to_string(),
            Self::TwoFactorSuccess => "2fa_success_login_confirmed".to_string(),
            Self::TwoFactorFailed(reason) => format!("2fa_failed_{reason}"),
            Self::LoginFailed => "login_failed".to_string(),
            Self::AccountBanned => "account_banned".to_string(),
            Self::TimeoutOrUnknown => "timeout_or_unknown".to_string(),
            Self::Error { .. } => "error".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::SuccessNo2fa | Self::TwoFactorSuccess)
    }

    /// Record-store write for this outcome.
    pub fn status_update(&self) -> RecordUpdate {
        match self {
            Self::SuccessNo2fa | Self::TwoFactorSuccess => RecordUpdate {
                logged_in: Some(true),
                ..RecordUpdate::status(STATUS_LOGGED_IN)
            },
            Self::TwoFactorFailed(reason) => RecordUpdate::status(format!("2FA Failed - {reason}")),
            Self::LoginFailed => RecordUpdate::status(STATUS_LOGIN_INCORRECT_PW),
            Self::AccountBanned => banned_update(),
            Self::TimeoutOrUnknown => RecordUpdate::status(STATUS_LOGIN_UNKNOWN),
            Self::Error { kind, reason } => {
                RecordUpdate::status(format!("Login Error: {kind}")).with_notes(reason.clone())
            }
        }
    }
}

impl fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// External collaborators a login run talks to. Optional ones are skipped when unset.
pub struct LoginServices {
    pub connector: Arc<dyn DeviceConnector>,
    pub account_store: Arc<dyn RecordStore>,
    pub codes: Arc<dyn CodeRetriever>,
    pub activator: Option<Arc<dyn EmailActivator>>,
    pub vpn: Option<Arc<dyn VpnRotator>>,
    pub identity: Option<Arc<dyn IdentityResetter>>,
    pub prompt: Option<Arc<dyn CodePrompt>>,
}

/// App left open on the home feed with watchers still armed, for warmup.
pub struct LoginSession {
    engine: Arc<UiEngine>,
    supervisor: PopupSupervisor,
    cancel: CancelFlag,
}

impl LoginSession {
    pub fn engine(&self) -> &UiEngine {
        &self.engine
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Stops watchers and closes the app.
    pub fn close(mut self) -> bool {
        self.supervisor.stop_watchers();
        self.engine.close_app()
    }
}

pub struct LoginResult {
    pub outcome: LoginOutcome,
    pub session: Option<LoginSession>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detected {
    Banned,
    IncorrectPassword,
    TwoFactor,
    LoggedIn,
}

#[derive(Default)]
struct Resources {
    engine: Option<Arc<UiEngine>>,
    supervisor: Option<PopupSupervisor>,
}

pub struct LoginWorkflow<'a> {
    config: &'a AppConfig,
    services: &'a LoginServices,
    registry: CallbackRegistry,
    cancel: CancelFlag,
    trace_id: String,
}

impl<'a> LoginWorkflow<'a> {
    pub fn new(config: &'a AppConfig, services: &'a LoginServices, trace_id: &str) -> Self {
        Self {
            config,
            services,
            registry: CallbackRegistry::with_builtins(),
            cancel: CancelFlag::new(),
            trace_id: trace_id.to_string(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self, row: &TaskRow) -> LoginResult {
        info!(
            trace_id = %self.trace_id,
            record_id = %row.record_id,
            username = %row.instagram_username,
            device = %row.device_id,
            "login run started"
        );
        let runner = StepRunner::new("login", self.cancel.clone(), &self.trace_id, &row.record_id);
        let mut resources = Resources::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(row, &runner, &mut resources)))
            .unwrap_or_else(|_| {
                Err(StepFailure::Fatal {
                    step: "workflow".to_string(),
                    error: AppError::system("Unhandled panic during login", &self.trace_id),
                })
            });

        // Every outcome is persisted, including a ban the suspension watcher already wrote.
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(failure) if failure.cause() == Some(CAUSE_SUSPENDED) => LoginOutcome::AccountBanned,
            Err(failure) => LoginOutcome::Error {
                kind: failure.kind(),
                reason: failure.notes(),
            },
        };

        self.record_outcome(row, &outcome);
        let session = self.finish(resources, &outcome);
        LoginResult { outcome, session }
    }

    fn execute(&self, row: &TaskRow, runner: &StepRunner, resources: &mut Resources) -> StepResult<LoginOutcome> {
        runner.run("record validation", || {
            let missing = row.missing_fields(&REQUIRED_FIELDS);
            if missing.is_empty() {
                Ok(())
            } else {
                Err(StepFailure::failed(format!("Missing fields: {}", missing.join(", "))))
            }
        })?;

        let device = runner.run("device connection", || {
            self.services
                .connector
                .connect(&row.device_id, &self.trace_id)
                .and_then(|device| device.info().map(|_| device))
                .map_err(|err| StepFailure::failed(format!("Connection Error: {}", err.error)))
        })?;

        runner.run("vpn rotation", || {
            if let Some(vpn) = &self.services.vpn {
                vpn.rotate(&device)
                    .map_err(|err| StepFailure::failed(format!("VPN rotation failed: {}", err.error)))?;
            }
            Ok(())
        })?;

        runner.run("identity reset", || {
            if let Some(identity) = &self.services.identity {
                match identity.reset(&device) {
                    Ok(true) => {}
                    Ok(false) => warn!(trace_id = %self.trace_id, "⚠️ identity reset skipped: helper notification missing"),
                    Err(err) if err.is_device_failure() => return Err(err.into()),
                    Err(err) => warn!(trace_id = %self.trace_id, error = %err, "⚠️ identity reset failed"),
                }
            }
            Ok(())
        })?;

        let engine = runner.run("watcher setup", || self.arm(row, &device, resources))?;

        let already_in = runner.run("app launch", || self.launch(&engine))?;
        if already_in {
            info!(trace_id = %self.trace_id, username = %row.instagram_username, "already logged in");
            return Ok(LoginOutcome::SuccessNo2fa);
        }

        runner.run("login form", || self.fill_form(&engine, row))?;

        runner.run("submit", || {
            if !engine.click_loc(Loc::LoginButton, Duration::from_secs(10)) {
                warn!(trace_id = %self.trace_id, "⚠️ login button missing, submitting with enter");
                if !engine.press_enter() {
                    return Err(StepFailure::failed("Failed to submit login form"));
                }
            }
            Ok(())
        })?;

        let detected = runner.run("post-login detection", || Ok(self.detect(&engine)))?;
        match detected {
            None => return Ok(LoginOutcome::TimeoutOrUnknown),
            Some(Detected::Banned) => return Ok(LoginOutcome::AccountBanned),
            Some(Detected::IncorrectPassword) => {
                engine.click_if_exists(engine.loc(Loc::DialogOk), Duration::from_secs(5));
                return Ok(LoginOutcome::LoginFailed);
            }
            Some(Detected::LoggedIn) => {
                self.dismiss_post_login_prompts(&engine);
                return Ok(LoginOutcome::SuccessNo2fa);
            }
            Some(Detected::TwoFactor) => {}
        }

        let code = runner.run("code retrieval", || {
            self.fetch_code(&engine, row)
                .ok_or_else(|| StepFailure::failed("no_code"))
        });
        let code = match code {
            Ok(code) => code,
            Err(StepFailure::Failed { reason, .. }) => return Ok(LoginOutcome::TwoFactorFailed(reason)),
            Err(other) => return Err(other),
        };

        let accepted = runner.run("code entry", || Ok(self.enter_code(&engine, &code)))?;
        if !accepted {
            return Ok(LoginOutcome::TwoFactorFailed("code_rejected".to_string()));
        }

        runner.run("post-2fa prompts", || {
            self.dismiss_post_login_prompts(&engine);
            Ok(())
        })?;

        runner.run("final verification", || {
            let locators = [
                engine.loc(Loc::AccountSuspended),
                engine.loc(Loc::StoryIndicator),
                engine.loc(Loc::HomeFeed),
                engine.loc(Loc::NotificationsPrompt),
                engine.loc(Loc::SaveLoginPrompt),
            ];
            let timeout = Duration::from_secs(self.config.login.final_verify_timeout_secs);
            Ok(match engine.wait_for_any(&locators, timeout) {
                Some(0) => LoginOutcome::AccountBanned,
                Some(_) => LoginOutcome::TwoFactorSuccess,
                None => LoginOutcome::TimeoutOrUnknown,
            })
        })
    }

    fn arm(&self, row: &TaskRow, device: &Arc<dyn Device>, resources: &mut Resources) -> StepResult<Arc<UiEngine>> {
        let catalog = Arc::new(XpathCatalog::build(
            &row.package_name,
            self.config.reel_id_prefix.as_deref(),
            &self.config.catalog_overrides,
        )?);
        let engine = Arc::new(
            UiEngine::new(device.clone(), catalog.clone(), self.config, &self.trace_id)?
                .with_cancel(self.cancel.clone()),
        );
        resources.engine = Some(engine.clone());
        let rules = self
            .config
            .popups
            .clone()
            .unwrap_or_else(|| catalog.default_popup_rules());
        let mut supervisor = PopupSupervisor::new(
            device.clone(),
            catalog,
            rules,
            self.registry.clone(),
            self.config.engine.watcher_tick(),
        )?;
        // No content record during login: the error-toast watcher only aborts.
        supervisor.set_context(
            WatchContext::new(&row.package_name, &self.trace_id, self.cancel.clone())
                .with_record(&row.record_id, row.account_id(), &row.instagram_username)
                .with_account_store(self.services.account_store.clone()),
        );
        supervisor.register_and_start_watchers()?;
        resources.supervisor = Some(supervisor);
        Ok(engine)
    }

    /// `Ok(true)` when the home feed is already showing.
    fn launch(&self, engine: &UiEngine) -> StepResult<bool> {
        let launch = &self.config.launch;
        if !engine.open_app(None, Duration::from_secs(launch.readiness_timeout_secs), launch.max_retries)? {
            return Err(StepFailure::failed("Failed to launch Instagram"));
        }
        let locators = [
            engine.loc(Loc::AlreadyHaveAccount),
            engine.loc(Loc::LoginUsernameField),
            engine.loc(Loc::HomeFeed),
        ];
        match engine.wait_for_any(&locators, Duration::from_secs(launch.readiness_timeout_secs)) {
            Some(2) => Ok(true),
            Some(_) => Ok(false),
            None => Err(StepFailure::failed("Login screen not found")),
        }
    }

    fn fill_form(&self, engine: &UiEngine, row: &TaskRow) -> StepResult<()> {
        if engine.click_if_exists(engine.loc(Loc::AlreadyHaveAccount), Duration::from_secs(3)) {
            engine.pacer().sleep_between(1.0, 2.0);
        }
        if !engine.input_text(engine.loc(Loc::LoginUsernameField), &row.instagram_username, true, Duration::from_secs(15)) {
            return Err(StepFailure::failed("Username field not usable"));
        }
        engine.pacer().sleep_between(0.5, 1.5);
        if !engine.input_text(engine.loc(Loc::LoginPasswordField), &row.instagram_password, true, Duration::from_secs(10)) {
            return Err(StepFailure::failed("Password field not usable"));
        }
        engine.pacer().sleep_between(0.5, 1.5);
        Ok(())
    }

    fn detect(&self, engine: &UiEngine) -> Option<Detected> {
        let signals = [
            (Loc::AccountSuspended, Detected::Banned),
            (Loc::IncorrectPassword, Detected::IncorrectPassword),
            (Loc::TwoFactorPrompt, Detected::TwoFactor),
            (Loc::CodeInput, Detected::TwoFactor),
            (Loc::CheckYourEmail, Detected::TwoFactor),
            (Loc::SaveLoginPrompt, Detected::LoggedIn),
            (Loc::NotificationsPrompt, Detected::LoggedIn),
            (Loc::StoryIndicator, Detected::LoggedIn),
            (Loc::HomeFeed, Detected::LoggedIn),
        ];
        let locators: Vec<&str> = signals.iter().map(|(loc, _)| engine.loc(*loc)).collect();
        let timeout = Duration::from_secs(self.config.login.detect_timeout_secs);
        let detected = engine.wait_for_any(&locators, timeout).map(|index| signals[index].1);
        info!(trace_id = %self.trace_id, detected = ?detected, "post-login screen");
        detected
    }

    fn code_request(&self, row: &TaskRow) -> CodeRequest {
        let login = &self.config.login;
        CodeRequest {
            email: row.email_address.clone(),
            password: row.email_password.clone(),
            host: login.imap_host.clone(),
            port: login.imap_port,
            timeout: Duration::from_secs(login.imap_timeout_secs),
        }
    }

    fn try_mailbox(&self, request: &CodeRequest, attempt: u32) -> Option<String> {
        match self.services.codes.get_code(request) {
            Ok(Some(code)) => {
                info!(trace_id = %self.trace_id, attempt, "✅ verification code received");
                Some(code)
            }
            Ok(None) => {
                warn!(trace_id = %self.trace_id, attempt, "⚠️ no verification code yet");
                None
            }
            Err(err) => {
                warn!(trace_id = %self.trace_id, attempt, error = %err, "⚠️ mailbox lookup failed");
                None
            }
        }
    }

    /// Mailbox with retries, then protocol activation and one more try, then a human.
    fn fetch_code(&self, engine: &UiEngine, row: &TaskRow) -> Option<String> {
        let login = &self.config.login;
        let request = self.code_request(row);
        let delay = Duration::from_secs(login.code_retry_delay_secs);
        let attempts = login.code_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(code) = self.try_mailbox(&request, attempt) {
                return Some(code);
            }
            if attempt < attempts {
                engine.pacer().sleep(delay);
            }
        }

        if let Some(activator) = &self.services.activator {
            match activator.activate(&row.email_address, &row.email_password) {
                Ok(result) => info!(trace_id = %self.trace_id, status = %result.status, message = %result.message, "email protocols activated"),
                Err(err) => warn!(trace_id = %self.trace_id, error = %err, "⚠️ email activation failed"),
            }
            engine.pacer().sleep(delay);
            if let Some(code) = self.try_mailbox(&request, attempts + 1) {
                return Some(code);
            }
        }

        if login.human_code_prompt {
            if let Some(prompt) = &self.services.prompt {
                return prompt.ask_code(&row.email_address);
            }
        }
        error!(trace_id = %self.trace_id, email = %row.email_address, "❌ no verification code available");
        None
    }

    /// True once the code field is gone after typing (auto-submit or Continue).
    fn enter_code(&self, engine: &UiEngine, code: &str) -> bool {
        let input = engine.loc(Loc::CodeInput);
        if !engine.wait_for_element_appear(input, Duration::from_secs(10), None) {
            engine.click_if_exists(engine.loc(Loc::ContinueButton), Duration::from_secs(3));
        }
        if !engine.input_text(input, code, true, Duration::from_secs(10)) {
            return false;
        }
        if engine.wait_for_element_vanish(input, Duration::from_secs(10), None) {
            return true;
        }
        if engine.click_if_exists(engine.loc(Loc::ContinueButton), Duration::from_secs(5)) {
            return engine.wait_for_element_vanish(input, Duration::from_secs(15), None);
        }
        false
    }

    fn dismiss_post_login_prompts(&self, engine: &UiEngine) {
        if engine.element_exists(engine.loc(Loc::SaveLoginPrompt)) {
            let choices = [Loc::SaveButton, Loc::SaveButtonPl, Loc::NotNowButton, Loc::NotNowButtonPl];
            let dismissed = choices
                .iter()
                .any(|choice| engine.click_if_exists(engine.loc(*choice), Duration::from_secs(2)));
            if !dismissed {
                warn!(trace_id = %self.trace_id, "⚠️ save-login prompt could not be dismissed");
            }
            engine.pacer().sleep_between(1.0, 2.0);
        }
        if engine.element_exists(engine.loc(Loc::SetupNewDevicePrompt)) {
            engine.click_if_exists(engine.loc(Loc::SkipButton), Duration::from_secs(3));
            engine.pacer().sleep_between(1.0, 2.0);
        }
    }

    fn record_outcome(&self, row: &TaskRow, outcome: &LoginOutcome) {
        let update = outcome.status_update();
        match self.services.account_store.update(row.account_id(), &update) {
            Ok(_) if outcome.is_success() => {
                info!(trace_id = %self.trace_id, record_id = %row.account_id(), outcome = %outcome, "✅ login recorded")
            }
            Ok(_) => {
                error!(trace_id = %self.trace_id, record_id = %row.account_id(), outcome = %outcome, status = ?update.status, "❌ login failed")
            }
            Err(err) => {
                error!(trace_id = %self.trace_id, record_id = %row.account_id(), error = %err, "❌ failed to record login outcome")
            }
        }
    }

    fn finish(&self, resources: Resources, outcome: &LoginOutcome) -> Option<LoginSession> {
        let Resources { engine, supervisor } = resources;
        match (engine, supervisor) {
            (Some(engine), Some(supervisor)) if outcome.is_success() => Some(LoginSession {
                engine,
                supervisor,
                cancel: self.cancel.clone(),
            }),
            (engine, supervisor) => {
                if let Some(mut supervisor) = supervisor {
                    supervisor.stop_watchers();
                }
                if let Some(engine) = engine {
                    engine.close_app();
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::STATUS_BANNED;
    use crate::app::services::sqlite_store::SqliteStore;
    use crate::app::testing::{
        node, screen, text, FakeConnector, FakeDevice, NoopRotator, ScriptedCodeRetriever, TYPED,
    };

    const PKG: &str = "com.example.ig";

    fn row() -> TaskRow {
        TaskRow {
            record_id: "acc1".to_string(),
            instagram_username: "u1".to_string(),
            instagram_password: "secret".to_string(),
            email_address: "u1@example.com".to_string(),
            email_password: "mailpw".to_string(),
            package_name: PKG.to_string(),
            device_id: "D1".to_string(),
            ..TaskRow::default()
        }
    }

    fn store() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
        store.upsert(&row(), "unused").expect("seed");
        store
    }

    fn edit_text(attrs: &[(&str, &str)], bounds: [i32; 4]) -> String {
        let mut all = vec![("class", "android.widget.EditText"), ("clickable", "true")];
        all.extend_from_slice(attrs);
        node(&all, bounds)
    }

    fn login_device() -> Arc<FakeDevice> {
        let device = Arc::new(FakeDevice::new("D1"));
        device
            .add_screen(
                "login",
                screen(PKG, &[
                    edit_text(&[("resource-id", "com.example.ig:id/login_username"), ("text", "Username")], [40, 600, 1040, 720]),
                    edit_text(&[("resource-id", "com.example.ig:id/password"), ("text", "Password")], [40, 760, 1040, 880]),
                    text("Log in", [40, 950, 1040, 1070]),
                ]),
            )
            .on_app_start("blank", "login");
        device
    }

    fn services(device: Arc<FakeDevice>, store: Arc<SqliteStore>, codes: Arc<ScriptedCodeRetriever>) -> LoginServices {
        LoginServices {
            connector: Arc::new(FakeConnector { device }),
            account_store: store,
            codes,
            activator: None,
            vpn: Some(Arc::new(NoopRotator::default())),
            identity: None,
            prompt: None,
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.engine.time_scale = 0.0;
        config
    }

    #[test]
    fn two_factor_login_confirms_home_feed() {
        let device = login_device();
        device
            .add_screen(
                "code",
                screen(PKG, &[
                    text("Check your email", [40, 200, 1040, 300]),
                    edit_text(&[("content-desc", "Code"), ("text", TYPED)], [40, 600, 1040, 720]),
                    text("Continue", [40, 950, 1040, 1070]),
                ]),
            )
            .add_screen(
                "save_login",
                screen(PKG, &[
                    text("Save your login info?", [40, 300, 1040, 400]),
                    text("Save", [40, 1500, 1040, 1600]),
                    text("Not now", [40, 1650, 1040, 1750]),
                ]),
            )
            .add_screen("feed", screen(PKG, &[text("Your story", [0, 200, 200, 300])]))
            .on_click("login", "Log in", "code")
            .on_click("code", "Continue", "save_login")
            .on_click("save_login", "Save", "feed");
        let store = store();
        let codes = Arc::new(ScriptedCodeRetriever::new("123456", 3));
        let services = services(device.clone(), store.clone(), codes.clone());
        let config = config();

        let result = LoginWorkflow::new(&config, &services, "t1").run(&row());

        assert_eq!(result.outcome, LoginOutcome::TwoFactorSuccess);
        assert_eq!(result.outcome.label(), "2fa_success_login_confirmed");
        assert_eq!(codes.call_count(), 3);
        assert!(device.typed().ends_with("123456"));
        let stored = store.fetch_by_id("acc1").expect("fetch").expect("row");
        assert_eq!(stored.status, STATUS_LOGGED_IN);
        assert!(stored.logged_in);

        let session = result.session.expect("app left open for warmup");
        assert_eq!(device.current_screen(), "feed");
        assert!(session.close());
        assert_eq!(device.current_package().expect("pkg"), None);
    }

    #[test]
    fn incorrect_password_is_login_failed() {
        let device = login_device();
        device
            .add_screen(
                "rejected",
                screen(PKG, &[
                    text("Incorrect Password", [40, 800, 1040, 900]),
                    text("OK", [40, 1000, 1040, 1100]),
                ]),
            )
            .on_click("login", "Log in", "rejected")
            .on_click("rejected", "OK", "login");
        let store = store();
        let services = services(device.clone(), store.clone(), Arc::new(ScriptedCodeRetriever::new("1", 1)));
        let config = config();

        let result = LoginWorkflow::new(&config, &services, "t1").run(&row());

        assert_eq!(result.outcome, LoginOutcome::LoginFailed);
        assert!(result.session.is_none());
        assert_eq!(device.current_screen(), "login");
        let stored = store.fetch_by_id("acc1").expect("fetch").expect("row");
        assert_eq!(stored.status, STATUS_LOGIN_INCORRECT_PW);
        assert!(!stored.logged_in);
    }

    #[test]
    fn missing_code_fails_two_factor() {
        let device = login_device();
        device
            .add_screen(
                "code",
                screen(PKG, &[edit_text(&[("content-desc", "Code"), ("text", TYPED)], [40, 600, 1040, 720])]),
            )
            .on_click("login", "Log in", "code");
        let store = store();
        let codes = Arc::new(ScriptedCodeRetriever::new("123456", 99));
        let services = services(device, store.clone(), codes.clone());
        let config = config();

        let result = LoginWorkflow::new(&config, &services, "t1").run(&row());

        assert_eq!(result.outcome.label(), "2fa_failed_no_code");
        assert_eq!(codes.call_count(), 5);
        let stored = store.fetch_by_id("acc1").expect("fetch").expect("row");
        assert_eq!(stored.status, "2FA Failed - no_code");
    }

    #[test]
    fn suspension_after_submit_bans_account() {
        let device = login_device();
        device
            .add_screen("suspended", screen(PKG, &[text("We suspended your account", [40, 400, 1040, 500])]))
            .on_click("login", "Log in", "suspended");
        let store = store();
        let services = services(device, store.clone(), Arc::new(ScriptedCodeRetriever::new("1", 1)));
        let config = config();

        let result = LoginWorkflow::new(&config, &services, "t1").run(&row());

        assert_eq!(result.outcome, LoginOutcome::AccountBanned);
        let stored = store.fetch_by_id("acc1").expect("fetch").expect("row");
        assert_eq!(stored.status, STATUS_BANNED);
    }

    /// Trips the run's flag from inside a step, as a Ctrl-C handler would.
    struct InterruptingRotator(CancelFlag);

    impl VpnRotator for InterruptingRotator {
        fn rotate(&self, _device: &Arc<dyn Device>) -> Result<(), AppError> {
            self.0.trip(crate::app::state::CAUSE_INTERRUPTED);
            Ok(())
        }
    }

    #[test]
    fn interrupted_login_records_an_error_status() {
        let device = login_device();
        let store = store();
        let cancel = CancelFlag::new();
        let mut services = services(device, store.clone(), Arc::new(ScriptedCodeRetriever::new("1", 1)));
        services.vpn = Some(Arc::new(InterruptingRotator(cancel.clone())));
        let config = config();

        let result = LoginWorkflow::new(&config, &services, "t1").with_cancel(cancel).run(&row());

        assert!(matches!(result.outcome, LoginOutcome::Error { kind: "Aborted", .. }));
        assert!(result.session.is_none());
        let stored = store.fetch_by_id("acc1").expect("fetch").expect("row");
        assert_eq!(stored.status, "Login Error: Aborted");
        assert!(stored.notes.contains("vpn rotation"));
        assert!(stored.notes.contains("interrupted"));
    }

    #[test]
    fn already_logged_in_skips_the_form() {
        let device = Arc::new(FakeDevice::new("D1"));
        device
            .add_screen("feed", screen(PKG, &[node(&[("resource-id", "com.example.ig:id/feed_tab")], [0, 2250, 200, 2400])]))
            .on_app_start("blank", "feed");
        let store = store();
        let services = services(device.clone(), store, Arc::new(ScriptedCodeRetriever::new("1", 1)));
        let config = config();

        let result = LoginWorkflow::new(&config, &services, "t1").run(&row());

        assert_eq!(result.outcome, LoginOutcome::SuccessNo2fa);
        assert!(device.typed().is_empty());
        assert!(result.session.expect("session").close());
    }

    #[test]
    fn outcome_labels_and_statuses() {
        assert_eq!(LoginOutcome::TwoFactorFailed("code_rejected".into()).label(), "2fa_failed_code_rejected");
        assert_eq!(LoginOutcome::TimeoutOrUnknown.status_update().status.as_deref(), Some(STATUS_LOGIN_UNKNOWN));
        let error = LoginOutcome::Error {
            kind: "Device Error",
            reason: "Device Error: gone".into(),
        };
        let update = error.status_update();
        assert_eq!(update.status.as_deref(), Some("Login Error: Device Error"));
        assert_eq!(update.notes.as_deref(), Some("Device Error: gone"));
        assert_eq!(LoginOutcome::AccountBanned.status_update().logged_in, Some(false));
    }
}
