use std::path::PathBuf;
use std::sync::Arc;

use reel_pilot_lib::app::adb::device::AdbConnector;
use reel_pilot_lib::app::adb::locator::resolve_adb_program;
use reel_pilot_lib::app::config::{config_path, load_config_from_path, AppConfig};
use reel_pilot_lib::app::error::AppError;
use reel_pilot_lib::app::logging::{init_logging, resolve_trace_id};
use reel_pilot_lib::app::models::{RecordUpdate, STATUS_WARMUP_DONE};
use reel_pilot_lib::app::secrets::{
    Secrets, ADB_PATH, AIRTABLE_ACCOUNTS_BASE_ID, AIRTABLE_ACCOUNTS_TABLE, AIRTABLE_API_KEY,
    EMAIL_ACTIVATION_URL, RECORD_STORE_SQLITE,
};
use reel_pilot_lib::app::services::email_activator::{EmailActivator, HttpEmailActivator};
use reel_pilot_lib::app::services::identity::{IdentityResetter, NotificationIdentityResetter};
use reel_pilot_lib::app::services::imap_code::ImapCodeRetriever;
use reel_pilot_lib::app::services::prompt::StdinCodePrompt;
use reel_pilot_lib::app::services::record_store::{AirtableStore, RecordStore};
use reel_pilot_lib::app::services::sqlite_store::SqliteStore;
use reel_pilot_lib::app::services::vpn::{UiVpnRotator, VpnRotator};
use reel_pilot_lib::app::state::{CancelFlag, CAUSE_INTERRUPTED};
use reel_pilot_lib::app::warmup::WarmupSession;
use reel_pilot_lib::app::workflows::login::{LoginServices, LoginWorkflow};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
struct Args {
    config: Option<PathBuf>,
    project_root: Option<PathBuf>,
    trace_id: Option<String>,
    skip_warmup: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        project_root: None,
        trace_id: None,
        skip_warmup: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let value = it.next().ok_or_else(|| "--config requires a value".to_string())?;
                args.config = Some(PathBuf::from(value));
            }
            "--project-root" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--project-root requires a value".to_string())?;
                args.project_root = Some(PathBuf::from(value));
            }
            "--skip-warmup" => {
                args.skip_warmup = true;
            }
            "--trace-id" => {
                args.trace_id = Some(it.next().ok_or_else(|| "--trace-id requires a value".to_string())?);
            }
            "-h" | "--help" => {
                return Err("Usage: login-bot [--config PATH] [--trace-id ID] [--project-root DIR] [--skip-warmup]\n".to_string());
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }
    Ok(args)
}

fn build_services(secrets: &Secrets, config: &AppConfig, trace_id: &str) -> Result<LoginServices, AppError> {
    let account_store: Arc<dyn RecordStore> = match secrets.get(RECORD_STORE_SQLITE) {
        Some(path) => Arc::new(SqliteStore::open(&PathBuf::from(path))?),
        None => {
            secrets.require(&[AIRTABLE_API_KEY, AIRTABLE_ACCOUNTS_BASE_ID, AIRTABLE_ACCOUNTS_TABLE])?;
            Arc::new(AirtableStore::new(
                secrets.value(AIRTABLE_API_KEY)?,
                secrets.value(AIRTABLE_ACCOUNTS_BASE_ID)?,
                secrets.value(AIRTABLE_ACCOUNTS_TABLE)?,
                trace_id,
            )?)
        }
    };
    let activator: Option<Arc<dyn EmailActivator>> = match secrets.get(EMAIL_ACTIVATION_URL) {
        Some(url) => Some(Arc::new(HttpEmailActivator::new(url, trace_id)?)),
        None => None,
    };
    let vpn: Option<Arc<dyn VpnRotator>> = config
        .login
        .vpn_package
        .as_deref()
        .map(|pkg| Arc::new(UiVpnRotator::new(pkg, config, trace_id)) as Arc<dyn VpnRotator>);
    let identity: Option<Arc<dyn IdentityResetter>> = config
        .login
        .identity_package
        .as_deref()
        .map(|pkg| Arc::new(NotificationIdentityResetter::new(pkg, config, trace_id)) as Arc<dyn IdentityResetter>);
    Ok(LoginServices {
        connector: Arc::new(AdbConnector::new(resolve_adb_program(secrets.get(ADB_PATH), trace_id)?)),
        account_store,
        codes: Arc::new(ImapCodeRetriever::new(trace_id)),
        activator,
        vpn,
        identity,
        prompt: Some(Arc::new(StdinCodePrompt)),
    })
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };
    init_logging();
    let trace_id = resolve_trace_id(args.trace_id.clone());

    let project_root = args
        .project_root
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let config_file = args.config.unwrap_or_else(|| config_path(&project_root));
    let config = match load_config_from_path(&config_file) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };
    let secrets = Secrets::load(&project_root);
    let services = match build_services(&secrets, &config, &trace_id) {
        Ok(services) => services,
        Err(err) => {
            error!(trace_id = %trace_id, error = %err, "❌ startup failed");
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    // One flag spans login and warmup; the popup supervisor trips the same one.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            cancel.trip(CAUSE_INTERRUPTED);
        }) {
            warn!(trace_id = %trace_id, error = %err, "⚠️ Ctrl-C handler not installed");
        }
    }

    let row = match services.account_store.fetch_unused(1) {
        Ok(rows) => match rows.into_iter().next() {
            Some(row) => row,
            None => {
                info!(trace_id = %trace_id, "no unused account available");
                return;
            }
        },
        Err(err) => {
            error!(trace_id = %trace_id, error = %err, "❌ failed to fetch an account");
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let result = LoginWorkflow::new(&config, &services, &trace_id)
        .with_cancel(cancel)
        .run(&row);
    info!(
        trace_id = %trace_id,
        record_id = %row.record_id,
        outcome = %result.outcome,
        "login finished"
    );

    let Some(session) = result.session else {
        return;
    };
    if args.skip_warmup {
        session.close();
        return;
    }

    let warmup = WarmupSession::new(session.engine(), &config.scroller)
        .with_cancel(session.cancel_flag().clone())
        .run(None);
    match warmup {
        Ok(summary) if !summary.aborted => {
            info!(
                trace_id = %trace_id,
                keyword = %summary.keyword,
                reels = summary.total_reels_processed,
                liked = summary.total_liked,
                scrolls = summary.scrolls,
                "✅ warmup complete"
            );
            if let Err(err) = services
                .account_store
                .update(&row.record_id, &RecordUpdate::status(STATUS_WARMUP_DONE))
            {
                warn!(trace_id = %trace_id, error = %err, "⚠️ failed to record warmup status");
            }
        }
        Ok(summary) => {
            warn!(trace_id = %trace_id, reels = summary.total_reels_processed, "⚠️ warmup aborted");
        }
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "⚠️ warmup failed");
        }
    }
    session.close();
}
