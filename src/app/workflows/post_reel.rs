//! Download, push, compose and share one reel for one task row.

use std::any::Any;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::app::adb::device::{Device, DeviceConnector};
use crate::app::adb::paths::{device_parent_dir, media_device_path, validate_device_path, MEDIA_ROOT, SCAN_DIRS};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::models::{DownloadedMedia, RecordUpdate, TaskRow, TrackInfo, STATUS_POSTED, STATUS_POST_FAILED};
use crate::app::services::caption_gen::CaptionGenerator;
use crate::app::services::drive::MediaDownloader;
use crate::app::services::record_store::RecordStore;
use crate::app::state::{CancelFlag, WatchContext};
use crate::app::ui::catalog::{Loc, XpathCatalog};
use crate::app::ui::engine::UiEngine;
use crate::app::watchers::rules::CallbackRegistry;
use crate::app::watchers::supervisor::PopupSupervisor;
use crate::app::workflows::steps::{StepFailure, StepResult, StepRunner};
use crate::app::workflows::{audio, caption};

const REQUIRED_FIELDS: [&str; 4] = ["instagram_username", "media_url", "package_name", "device_id"];
const VIDEO_ATTEMPTS: u32 = 3;
const CAPTION_PREFIX_CHARS: usize = 20;

/// External collaborators a post run talks to.
pub struct PostServices {
    pub connector: Arc<dyn DeviceConnector>,
    /// Table holding the task rows.
    pub content_store: Arc<dyn RecordStore>,
    /// Table holding account rows (ban status).
    pub account_store: Arc<dyn RecordStore>,
    pub downloader: Arc<dyn MediaDownloader>,
    pub captions: Arc<dyn CaptionGenerator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostOutcome {
    pub record_id: String,
    pub success: bool,
    pub reason: Option<String>,
    pub failed_step: Option<String>,
    pub caption: Option<String>,
    pub track: Option<TrackInfo>,
}

struct Published {
    caption: String,
    track: TrackInfo,
}

/// Resources the cleanup block must release on every exit path.
#[derive(Default)]
struct Session {
    engine: Option<Arc<UiEngine>>,
    supervisor: Option<PopupSupervisor>,
    local_file: Option<PathBuf>,
    album: Option<String>,
    frames_dir: Option<PathBuf>,
}

pub struct PostReelWorkflow<'a> {
    config: &'a AppConfig,
    services: &'a PostServices,
    registry: CallbackRegistry,
    project_root: PathBuf,
    cancel: CancelFlag,
    trace_id: String,
}

impl<'a> PostReelWorkflow<'a> {
    pub fn new(config: &'a AppConfig, services: &'a PostServices, project_root: &Path, trace_id: &str) -> Self {
        Self {
            config,
            services,
            registry: CallbackRegistry::with_builtins(),
            project_root: project_root.to_path_buf(),
            cancel: CancelFlag::new(),
            trace_id: trace_id.to_string(),
        }
    }

    /// Shares the flag with a Ctrl-C handler or another supervisor.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self, row: &TaskRow) -> PostOutcome {
        info!(
            trace_id = %self.trace_id,
            record_id = %row.record_id,
            username = %row.instagram_username,
            device = %row.device_id,
            "post run started"
        );
        let runner = StepRunner::new("post_reel", self.cancel.clone(), &self.trace_id, &row.record_id);
        let mut session = Session::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(row, &runner, &mut session)))
            .unwrap_or_else(|payload| {
                Err(StepFailure::Fatal {
                    step: "workflow".to_string(),
                    error: AppError::system(format!("Unhandled panic: {}", panic_message(payload.as_ref())), &self.trace_id),
                })
            });
        self.cleanup(&mut session);

        match result {
            Ok(published) => {
                info!(trace_id = %self.trace_id, record_id = %row.record_id, "✅ reel posted");
                PostOutcome {
                    record_id: row.record_id.clone(),
                    success: true,
                    reason: None,
                    failed_step: None,
                    caption: Some(published.caption),
                    track: Some(published.track),
                }
            }
            Err(failure) => {
                self.record_failure(row, &failure);
                PostOutcome {
                    record_id: row.record_id.clone(),
                    success: false,
                    reason: Some(failure.reason()),
                    failed_step: Some(failure.step().to_string()),
                    caption: None,
                    track: None,
                }
            }
        }
    }

    fn execute(&self, row: &TaskRow, runner: &StepRunner, session: &mut Session) -> StepResult<Published> {
        runner.run("record validation", || {
            let missing = row.missing_fields(&REQUIRED_FIELDS);
            if missing.is_empty() {
                Ok(())
            } else {
                Err(StepFailure::failed(format!("Missing fields: {}", missing.join(", "))))
            }
        })?;

        let device = runner.run("device connection", || {
            let device = self
                .services
                .connector
                .connect(&row.device_id, &self.trace_id)
                .and_then(|device| device.info().map(|_| device))
                .map_err(|err| StepFailure::failed(format!("Connection Error: {}", err.error)))?;
            Ok(device)
        })?;

        let engine = runner.run("watcher setup", || {
            let catalog = Arc::new(XpathCatalog::build(
                &row.package_name,
                self.config.reel_id_prefix.as_deref(),
                &self.config.catalog_overrides,
            )?);
            let engine = Arc::new(
                UiEngine::new(device.clone(), catalog.clone(), self.config, &self.trace_id)?
                    .with_cancel(self.cancel.clone()),
            );
            session.engine = Some(engine.clone());
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
            supervisor.set_context(
                WatchContext::new(&row.package_name, &self.trace_id, self.cancel.clone())
                    .with_record(&row.record_id, row.account_id(), &row.instagram_username)
                    .with_stores(self.services.content_store.clone(), self.services.account_store.clone()),
            );
            supervisor.register_and_start_watchers()?;
            session.supervisor = Some(supervisor);
            Ok(engine)
        })?;

        runner.run("app launch", || {
            let launch = &self.config.launch;
            let launched = engine.open_app(
                Some(engine.loc(Loc::HomeFeed)),
                Duration::from_secs(launch.readiness_timeout_secs),
                launch.max_retries,
            )?;
            if launched {
                Ok(())
            } else {
                Err(StepFailure::failed("Failed to launch Instagram"))
            }
        })?;

        let media = runner.run("media download", || {
            let out_dir = self.config.temp_dir(&self.project_root);
            self.services
                .downloader
                .download(&row.media_url, &out_dir)
                .map_err(|err| StepFailure::failed(format!("Download failed: {}", err.error)))
        })?;
        session.local_file = Some(media.local_path.clone());

        runner.run("media push", || {
            let remote = media_device_path(&row.instagram_username, Utc::now().timestamp(), &media.local_path);
            let album = device_parent_dir(&remote);
            device.shell(&["mkdir", "-p", &album])?;
            session.album = Some(album);
            self.push_media(device.as_ref(), &remote, &media)?;
            engine.pacer().sleep(Duration::from_secs(3));
            Ok(())
        })?;

        runner.run("composer", || {
            if !engine.click_loc(Loc::CreateButton, Duration::from_secs(10)) {
                return Err(StepFailure::failed("Failed to click New Post"));
            }
            if !engine.wait_for_element_appear(engine.loc(Loc::ReelTab), Duration::from_secs(10), None) {
                return Err(StepFailure::failed("Failed to click New Post: composer did not open"));
            }
            Ok(())
        })?;

        runner.run("reel tab", || {
            let indicator = engine.loc(Loc::NewReelIndicator);
            for attempt in 1..=2 {
                if engine.click_loc(Loc::ReelTab, Duration::from_secs(5))
                    && engine.wait_for_element_appear(indicator, Duration::from_secs(8), None)
                {
                    return Ok(());
                }
                runner.retry("reel tab", attempt, "New reel indicator not shown");
            }
            Err(StepFailure::failed("Failed to select REEL tab"))
        })?;

        runner.run("video selection", || {
            let container = engine.loc(Loc::GalleryVideoContainer);
            let editor = engine.loc(Loc::AddAudioButton);
            for attempt in 1..=VIDEO_ATTEMPTS {
                if engine.click_by_locator(container, Duration::from_secs(10))
                    && engine.wait_for_element_appear(editor, Duration::from_secs(15), None)
                {
                    return Ok(());
                }
                runner.retry("video selection", attempt, "editor did not load");
                if !engine.element_exists(container) {
                    engine.press_back();
                }
                engine.pacer().sleep_between(1.0, 2.0);
            }
            Err(StepFailure::failed("Failed to select video"))
        })?;

        // The editor is playing the selected clip; the audio picker covers it.
        let frames = if self.config.posting.caption_frames > 0 {
            let dir = self.config.frames_dir(&self.project_root).join(&row.record_id);
            session.frames_dir = Some(dir.clone());
            engine.capture_frames(self.config.posting.caption_frames, Duration::from_secs(1), &dir)
        } else {
            Vec::new()
        };

        let track = runner.run("audio selection", || {
            audio::add_audio(&engine, &self.config.posting).map_err(StepFailure::failed)
        })?;

        let caption = runner.run("caption", || {
            let posting = &self.config.posting;
            let mut last = String::new();
            for attempt in 1..=posting.caption_attempts.max(1) {
                match caption::compose_caption(
                    &engine,
                    self.services.captions.as_ref(),
                    &frames,
                    posting.caption_similarity,
                ) {
                    Ok(caption) => return Ok(caption),
                    Err(reason) => {
                        runner.retry("caption", attempt, &reason);
                        last = reason;
                        engine.pacer().sleep_between(1.0, 2.0);
                    }
                }
            }
            Err(StepFailure::failed(last))
        })?;

        runner.run("share", || {
            if engine.click_loc(Loc::ShareButton, Duration::from_secs(15)) {
                Ok(())
            } else {
                Err(StepFailure::failed("Failed to click Share"))
            }
        })?;

        runner.run("post verification", || {
            let mut evidence = Vec::with_capacity(3);
            let prefix = caption_prefix(&caption);
            if !prefix.is_empty() {
                evidence.push(engine.catalog().reel_caption(&prefix));
            }
            evidence.push(engine.loc(Loc::InsightsPill).to_string());
            evidence.push(engine.catalog().profile_avatar(&row.instagram_username));
            let locators: Vec<&str> = evidence.iter().map(String::as_str).collect();
            let timeout = Duration::from_secs(self.config.posting.verify_timeout_secs);
            match engine.wait_for_any(&locators, timeout) {
                Some(index) => {
                    info!(trace_id = %self.trace_id, evidence = %locators[index], "post visible");
                    Ok(())
                }
                None => Err(StepFailure::failed("Post verification failed")),
            }
        })?;

        runner.run("record update", || {
            let update = RecordUpdate {
                posted: Some(true),
                caption: Some(caption.clone()),
                song: Some(track.raw.clone()),
                post_timestamp: Some(Utc::now()),
                ..RecordUpdate::status(STATUS_POSTED)
            };
            match self.services.content_store.update(&row.record_id, &update) {
                Ok(true) => Ok(()),
                Ok(false) => Err(StepFailure::failed("Record update rejected")),
                Err(err) => Err(StepFailure::failed(format!("Record update failed: {}", err.error))),
            }
        })?;

        runner.run("device cleanup", || {
            if let Some(album) = session.album.take() {
                remove_album(device.as_ref(), &album, &self.trace_id)?;
            }
            Ok(())
        })?;

        Ok(Published { caption, track })
    }

    fn push_media(&self, device: &dyn Device, remote: &str, media: &DownloadedMedia) -> StepResult<()> {
        device.push(&media.local_path, remote).map_err(|err| {
            if err.is_device_failure() {
                StepFailure::from(err)
            } else {
                StepFailure::failed(format!("Push to device failed: {}", err.error))
            }
        })?;
        info!(trace_id = %self.trace_id, remote = %remote, mime = %media.mime, "media pushed");

        let file_uri = format!("file://{remote}");
        let mut scans: Vec<Vec<&str>> = vec![vec![
            "am",
            "broadcast",
            "-a",
            "android.intent.action.MEDIA_SCANNER_SCAN_FILE",
            "-d",
            &file_uri,
        ]];
        scans.extend(SCAN_DIRS.iter().map(|dir| vec!["cmd", "media", "scan", *dir]));
        for command in scans {
            match device.shell(&command) {
                Ok(output) if output.success() => {}
                Ok(output) => warn!(trace_id = %self.trace_id, command = %command.join(" "), stderr = %output.stderr.trim(), "⚠️ media scan failed"),
                Err(err) => warn!(trace_id = %self.trace_id, command = %command.join(" "), error = %err, "⚠️ media scan failed"),
            }
        }
        Ok(())
    }

    fn cleanup(&self, session: &mut Session) {
        if let Some(mut supervisor) = session.supervisor.take() {
            supervisor.stop_watchers();
        }
        if let Some(engine) = session.engine.take() {
            if !engine.close_app() {
                warn!(trace_id = %self.trace_id, "⚠️ app may still be open after cleanup");
            }
            if let Some(album) = session.album.take() {
                if let Err(err) = remove_album(engine.device().as_ref(), &album, &self.trace_id) {
                    warn!(trace_id = %self.trace_id, album = %album, error = %err, "⚠️ failed to remove device media");
                }
            }
        }
        if let Some(path) = session.local_file.take() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(trace_id = %self.trace_id, path = %path.display(), error = %err, "⚠️ failed to delete local media"),
            }
        }
        if let Some(dir) = session.frames_dir.take() {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(trace_id = %self.trace_id, path = %dir.display(), error = %err, "⚠️ failed to delete frames"),
            }
        }
    }

    fn record_failure(&self, row: &TaskRow, failure: &StepFailure) {
        if failure.persisted_by_watcher() {
            warn!(
                trace_id = %self.trace_id,
                record_id = %row.record_id,
                reason = %failure.reason(),
                cause = ?failure.cause(),
                "🚫 run aborted; status left to the watcher that raised it"
            );
            return;
        }
        let update = match failure {
            StepFailure::Fatal { .. } => RecordUpdate::status(failure.reason()),
            _ => RecordUpdate::status(STATUS_POST_FAILED).with_notes(failure.notes()),
        };
        match self.services.content_store.update(&row.record_id, &update) {
            Ok(_) => error!(
                trace_id = %self.trace_id,
                record_id = %row.record_id,
                step = %failure.step(),
                reason = %failure.reason(),
                "❌ post failed"
            ),
            Err(err) => error!(trace_id = %self.trace_id, record_id = %row.record_id, error = %err, "❌ failed to record post failure"),
        }
    }
}

/// `rm -rf` restricted to per-user albums under the media root.
fn remove_album(device: &dyn Device, album: &str, trace_id: &str) -> Result<(), AppError> {
    validate_device_path(album).map_err(|msg| AppError::validation(msg, trace_id))?;
    if !album.starts_with(&format!("{MEDIA_ROOT}/")) {
        return Err(AppError::validation(
            format!("Refusing to remove {album} outside {MEDIA_ROOT}"),
            trace_id,
        ));
    }
    device.shell(&["rm", "-rf", album]).map(|_| ())
}

/// Leading plain text of a caption, short enough to survive truncation in the viewer.
pub fn caption_prefix(caption: &str) -> String {
    caption
        .chars()
        .take_while(|ch| ch.is_alphanumeric() || *ch == ' ' || matches!(ch, ',' | '.' | '!' | '?' | '-'))
        .take(CAPTION_PREFIX_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::paths::media_album_dir;
    use crate::app::models::STATUS_BANNED;
    use crate::app::services::sqlite_store::SqliteStore;
    use crate::app::state::CAUSE_INTERRUPTED;
    use crate::app::testing::{
        desc, node, parent, rid, screen, text, Action, FakeConnector, FakeDevice, MemoryCaptionGenerator,
        StaticDownloader, TYPED,
    };

    const PKG: &str = "com.example.ig";
    const SONG: &str = "Select track Espresso by Sabrina Carpenter,1.2M reels,2:55";
    const CAPTION: &str = "Sunset vibes 🌅 #travel";

    fn config(time_scale: f64) -> AppConfig {
        let mut config = AppConfig::default();
        config.engine.time_scale = time_scale;
        config
    }

    fn row() -> TaskRow {
        TaskRow {
            record_id: "rec1".to_string(),
            account_record_id: Some("acc1".to_string()),
            instagram_username: "u1".to_string(),
            package_name: PKG.to_string(),
            device_id: "D1".to_string(),
            media_url: "drive://abc".to_string(),
            ..TaskRow::default()
        }
    }

    fn stores() -> (Arc<SqliteStore>, Arc<SqliteStore>) {
        let content = Arc::new(SqliteStore::open_in_memory().expect("content store"));
        content.upsert(&row(), "today").expect("seed content");
        let accounts = Arc::new(SqliteStore::open_in_memory().expect("account store"));
        let account = TaskRow {
            record_id: "acc1".to_string(),
            instagram_username: "u1".to_string(),
            ..TaskRow::default()
        };
        accounts.upsert(&account, "active").expect("seed account");
        (content, accounts)
    }

    fn services(device: Arc<FakeDevice>, content: Arc<SqliteStore>, accounts: Arc<SqliteStore>) -> PostServices {
        PostServices {
            connector: Arc::new(FakeConnector { device }),
            content_store: content,
            account_store: accounts,
            downloader: Arc::new(StaticDownloader { fail: false }),
            captions: Arc::new(MemoryCaptionGenerator {
                caption: CAPTION.to_string(),
            }),
        }
    }

    /// Screens from the home feed through the posted reel.
    fn script_posting(device: &FakeDevice) {
        device
            .add_screen(
                "home",
                screen(PKG, &[rid("com.example.ig:id/feed_tab", [0, 2250, 200, 2400]), desc("Create", [440, 2250, 640, 2400])]),
            )
            .add_screen("composer", screen(PKG, &[text("REEL", [600, 2250, 800, 2350])]))
            .add_screen(
                "gallery",
                screen(PKG, &[
                    text("New reel", [0, 100, 400, 200]),
                    parent(
                        &[("resource-id", "com.example.ig:id/gallery_recycler_view")],
                        [0, 600, 1080, 2200],
                        &[desc("Video thumbnail, 0:15", [0, 600, 360, 960])],
                    ),
                ]),
            )
            .add_screen("editor", screen(PKG, &[desc("Add audio", [0, 2000, 200, 2100])]))
            .add_screen(
                "browser",
                screen(PKG, &[node(
                    &[("resource-id", "com.example.ig:id/track_container"), ("content-desc", SONG), ("clickable", "true")],
                    [0, 1000, 1080, 1150],
                )]),
            )
            .add_screen(
                "trim",
                screen(PKG, &[rid("com.example.ig:id/scrubber_recycler_view", [0, 1800, 1080, 1950]), text("Done", [700, 100, 860, 180])]),
            )
            .add_screen("next", screen(PKG, &[text("Next", [900, 100, 1060, 180])]))
            .add_screen(
                "caption",
                screen(PKG, &[
                    node(
                        &[("resource-id", "com.example.ig:id/caption_input_text_view"), ("text", TYPED), ("clickable", "true")],
                        [0, 400, 1080, 600],
                    ),
                    text("Share", [300, 2200, 780, 2300]),
                ]),
            )
            .add_screen("posted", screen(PKG, &[desc("u1's profile picture", [0, 100, 100, 200])]))
            .on_app_start("blank", "home")
            .on_click("home", "Create", "composer")
            .on_click("composer", "REEL", "gallery")
            .on_click("gallery", "^Video thumbnail", "editor")
            .on_click("editor", "Add audio", "browser")
            .on_click("browser", "@track_container", "trim")
            .on_click("trim", "Done", "next")
            .on_click("caption", "Share", "posted");
    }

    #[test]
    fn happy_post_persists_outcome_and_cleans_device() {
        let device = Arc::new(FakeDevice::new("D1"));
        script_posting(&device);
        device.on_click("next", "Next", "caption");
        let (content, accounts) = stores();
        let services = services(device.clone(), content.clone(), accounts);
        let root = tempfile::tempdir().expect("tempdir");
        let config = config(0.0);

        let outcome = PostReelWorkflow::new(&config, &services, root.path(), "t1").run(&row());

        assert!(outcome.success, "{:?}", outcome.reason);
        assert_eq!(outcome.caption.as_deref(), Some(CAPTION));
        let stored = content.fetch_by_id("rec1").expect("fetch").expect("row");
        assert_eq!(stored.status, STATUS_POSTED);
        assert!(stored.posted);
        assert_eq!(stored.caption, CAPTION);
        assert_eq!(stored.song, SONG);
        assert!(stored.post_timestamp.is_some());
        assert!(device.files().iter().all(|file| !file.starts_with("/sdcard/Pictures/u1/")));
        assert!(device.shell_log().iter().any(|cmd| cmd.starts_with("am broadcast -a android.intent.action.MEDIA_SCANNER_SCAN_FILE -d file:///sdcard/Pictures/u1/u1_")));
        assert!(device.shell_log().iter().any(|cmd| cmd == "cmd media scan /sdcard/DCIM"));
        let album_removal = format!("rm -rf {}", media_album_dir("u1"));
        assert!(device.shell_log().iter().any(|cmd| *cmd == album_removal));
        assert!(!root.path().join("temp").join("abc.mp4").exists());
        assert_eq!(device.screenshots(), vec!["editor".to_string(); 3]);
        assert!(!root.path().join("frames").join("rec1").exists());
        assert_eq!(device.current_package().expect("pkg"), None);
    }

    #[test]
    fn suspension_during_launch_aborts_and_bans() {
        let device = Arc::new(FakeDevice::new("D1"));
        device
            .add_screen(
                "suspended",
                screen(PKG, &[text("We suspended your account", [0, 400, 1080, 600]), text("Disagree with decision", [0, 1800, 1080, 1900])]),
            )
            .on_app_start("blank", "suspended");
        let (content, accounts) = stores();
        let services = services(device.clone(), content.clone(), accounts.clone());
        let root = tempfile::tempdir().expect("tempdir");
        let config = config(0.01);

        let outcome = PostReelWorkflow::new(&config, &services, root.path(), "t1").run(&row());

        assert!(!outcome.success);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("Aborted: critical failure detected during app launch")
        );
        let account = accounts.fetch_by_id("acc1").expect("fetch").expect("row");
        assert_eq!(account.status, STATUS_BANNED);
        let task = content.fetch_by_id("rec1").expect("fetch").expect("row");
        assert_ne!(task.status, STATUS_POST_FAILED);
        assert!(!device.actions().iter().any(|a| matches!(a, Action::Push { .. })));
    }

    #[test]
    fn stuck_next_fails_the_post_and_deletes_local_file() {
        let device = Arc::new(FakeDevice::new("D1"));
        script_posting(&device);
        let (content, accounts) = stores();
        let services = services(device.clone(), content.clone(), accounts);
        let root = tempfile::tempdir().expect("tempdir");
        let config = config(0.0);

        let outcome = PostReelWorkflow::new(&config, &services, root.path(), "t1").run(&row());

        assert!(!outcome.success);
        assert!(outcome.reason.as_deref().unwrap_or_default().contains("Next button stuck"));
        assert_eq!(outcome.failed_step.as_deref(), Some("audio selection"));
        let stored = content.fetch_by_id("rec1").expect("fetch").expect("row");
        assert_eq!(stored.status, STATUS_POST_FAILED);
        assert!(stored.notes.contains("Next button stuck"));
        assert!(!root.path().join("temp").join("abc.mp4").exists());
        assert!(device.files().is_empty());
    }

    #[test]
    fn unknown_device_is_a_connection_error() {
        let device = Arc::new(FakeDevice::new("OTHER"));
        let (content, accounts) = stores();
        let services = services(device, content.clone(), accounts);
        let root = tempfile::tempdir().expect("tempdir");
        let config = config(0.0);

        let outcome = PostReelWorkflow::new(&config, &services, root.path(), "t1").run(&row());

        assert!(outcome.reason.as_deref().unwrap_or_default().starts_with("Connection Error"));
        assert_eq!(outcome.failed_step.as_deref(), Some("device connection"));
    }

    #[test]
    fn download_failure_stops_before_push() {
        let device = Arc::new(FakeDevice::new("D1"));
        script_posting(&device);
        let (content, accounts) = stores();
        let mut services = services(device.clone(), content, accounts);
        services.downloader = Arc::new(StaticDownloader { fail: true });
        let root = tempfile::tempdir().expect("tempdir");
        let config = config(0.0);

        let outcome = PostReelWorkflow::new(&config, &services, root.path(), "t1").run(&row());

        assert!(outcome.reason.as_deref().unwrap_or_default().starts_with("Download failed"));
        assert!(device.files().is_empty());
    }

    #[test]
    fn interrupted_run_executes_no_steps() {
        let device = Arc::new(FakeDevice::new("D1"));
        let (content, accounts) = stores();
        let services = services(device.clone(), content.clone(), accounts);
        let root = tempfile::tempdir().expect("tempdir");
        let config = config(0.0);
        let cancel = CancelFlag::new();
        cancel.trip(CAUSE_INTERRUPTED);

        let outcome = PostReelWorkflow::new(&config, &services, root.path(), "t1")
            .with_cancel(cancel)
            .run(&row());

        assert_eq!(
            outcome.reason.as_deref(),
            Some("Aborted: critical failure detected before record validation")
        );
        assert!(device.actions().is_empty());
        let stored = content.fetch_by_id("rec1").expect("fetch").expect("row");
        assert_eq!(stored.status, STATUS_POST_FAILED);
    }

    /// Trips the run's flag while the caption is being written, as a Ctrl-C handler would.
    struct InterruptingCaptions(CancelFlag);

    impl CaptionGenerator for InterruptingCaptions {
        fn generate(&self) -> Result<String, AppError> {
            self.0.trip(CAUSE_INTERRUPTED);
            Ok(CAPTION.to_string())
        }
    }

    #[test]
    fn interrupt_mid_run_records_a_failed_post() {
        let device = Arc::new(FakeDevice::new("D1"));
        script_posting(&device);
        device.on_click("next", "Next", "caption");
        let (content, accounts) = stores();
        let cancel = CancelFlag::new();
        let mut services = services(device.clone(), content.clone(), accounts);
        services.captions = Arc::new(InterruptingCaptions(cancel.clone()));
        let root = tempfile::tempdir().expect("tempdir");
        let config = config(0.0);

        let outcome = PostReelWorkflow::new(&config, &services, root.path(), "t1")
            .with_cancel(cancel)
            .run(&row());

        assert!(!outcome.success);
        assert_eq!(outcome.failed_step.as_deref(), Some("caption"));
        let stored = content.fetch_by_id("rec1").expect("fetch").expect("row");
        assert_eq!(stored.status, STATUS_POST_FAILED);
        assert!(stored.notes.contains("during caption"));
        assert!(stored.notes.contains(CAUSE_INTERRUPTED));
        assert!(!stored.posted);
        assert!(stored.caption.is_empty());
    }

    #[test]
    fn album_removal_stays_under_the_media_root() {
        let device = FakeDevice::new("D1");
        assert!(remove_album(&device, "/sdcard/Pictures/u1", "t").is_ok());
        assert!(remove_album(&device, "/sdcard/Pictures/../DCIM", "t").is_err());
        assert!(remove_album(&device, "/sdcard/DCIM", "t").is_err());
        assert!(remove_album(&device, "/sdcard/Pictures", "t").is_err());
        assert_eq!(device.shell_log(), vec!["rm -rf /sdcard/Pictures/u1".to_string()]);
    }

    #[test]
    fn caption_prefix_stops_at_emoji_and_caps_length() {
        assert_eq!(caption_prefix("Sunset vibes 🌅 #travel"), "Sunset vibes");
        assert_eq!(caption_prefix("A very long caption that keeps going"), "A very long caption");
        assert_eq!(caption_prefix("🌅 first"), "");
    }
}
