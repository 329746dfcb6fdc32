use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use reel_pilot_lib::app::adb::device::AdbConnector;
use reel_pilot_lib::app::adb::locator::resolve_adb_program;
use reel_pilot_lib::app::config::{config_path, load_config_from_path};
use reel_pilot_lib::app::error::AppError;
use reel_pilot_lib::app::logging::{init_logging, new_trace_id, resolve_trace_id};
use reel_pilot_lib::app::secrets::{
    Secrets, ADB_PATH, AIRTABLE_ACCOUNTS_BASE_ID, AIRTABLE_ACCOUNTS_TABLE, AIRTABLE_ACTIVE_VIEW,
    AIRTABLE_API_KEY, AIRTABLE_CONTENT_BASE_ID, GOOGLE_DRIVE_CREDENTIALS, OPENAI_API_KEY, OPENAI_MODEL,
    RECORD_STORE_SQLITE,
};
use reel_pilot_lib::app::services::caption_gen::OpenAiCaptionGenerator;
use reel_pilot_lib::app::services::drive::DriveDownloader;
use reel_pilot_lib::app::services::record_store::{AirtableStore, RecordStore};
use reel_pilot_lib::app::services::sqlite_store::SqliteStore;
use reel_pilot_lib::app::state::{CancelFlag, CAUSE_INTERRUPTED};
use reel_pilot_lib::app::workflows::post_reel::{PostReelWorkflow, PostServices};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
struct Args {
    config: Option<PathBuf>,
    project_root: Option<PathBuf>,
    trace_id: Option<String>,
    model: Option<String>,
    count: Option<usize>,
    active: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        project_root: None,
        trace_id: None,
        model: None,
        count: None,
        active: false,
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
            "--model" => {
                args.model = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if args.model.is_none() {
                    return Err("--model requires a value".to_string());
                }
            }
            "--count" => {
                let value = it.next().ok_or_else(|| "--count requires a value".to_string())?;
                let count = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| "--count must be a number".to_string())?;
                args.count = Some(count.max(1));
            }
            "--active" => {
                args.active = true;
            }
            "--trace-id" => {
                args.trace_id = Some(it.next().ok_or_else(|| "--trace-id requires a value".to_string())?);
            }
            "-h" | "--help" => {
                return Err("Usage: post-bot [--config PATH] [--trace-id ID] [--project-root DIR] [--model NAME] [--count N] [--active]\n\n--active posts the single row of the AIRTABLE_ACTIVE_VIEW view instead of today's schedule.\n".to_string());
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }
    Ok(args)
}

fn prompt_line(question: &str) -> Option<String> {
    print!("{question}");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    Some(line.trim().to_string()).filter(|value| !value.is_empty())
}

/// Content rows live in one table per model; accounts in their own base.
fn build_services(secrets: &Secrets, model: &str, trace_id: &str) -> Result<PostServices, AppError> {
    secrets.require(&[OPENAI_API_KEY, GOOGLE_DRIVE_CREDENTIALS])?;
    let (content_store, account_store): (Arc<dyn RecordStore>, Arc<dyn RecordStore>) =
        match secrets.get(RECORD_STORE_SQLITE) {
            Some(path) => {
                let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open(&PathBuf::from(path))?);
                (Arc::clone(&store), store)
            }
            None => {
                secrets.require(&[
                    AIRTABLE_API_KEY,
                    AIRTABLE_CONTENT_BASE_ID,
                    AIRTABLE_ACCOUNTS_BASE_ID,
                    AIRTABLE_ACCOUNTS_TABLE,
                ])?;
                let content = AirtableStore::new(
                    secrets.value(AIRTABLE_API_KEY)?,
                    secrets.value(AIRTABLE_CONTENT_BASE_ID)?,
                    model,
                    trace_id,
                )?;
                let accounts = content.scoped(
                    secrets.value(AIRTABLE_ACCOUNTS_BASE_ID)?,
                    secrets.value(AIRTABLE_ACCOUNTS_TABLE)?,
                );
                let content: Arc<dyn RecordStore> = Arc::new(content);
                let accounts: Arc<dyn RecordStore> = Arc::new(accounts);
                (content, accounts)
            }
        };
    let downloader = DriveDownloader::from_credentials_file(
        &PathBuf::from(secrets.value(GOOGLE_DRIVE_CREDENTIALS)?),
        trace_id,
    )?;
    let captions = OpenAiCaptionGenerator::new(
        secrets.value(OPENAI_API_KEY)?,
        secrets.get(OPENAI_MODEL),
        trace_id,
    )?;
    Ok(PostServices {
        connector: Arc::new(AdbConnector::new(resolve_adb_program(secrets.get(ADB_PATH), trace_id)?)),
        content_store,
        account_store,
        downloader: Arc::new(downloader),
        captions: Arc::new(captions),
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

    let Some(model) = args.model.or_else(|| prompt_line("Model name: ")) else {
        eprintln!("A model name is required.");
        std::process::exit(1);
    };
    let active_view = if args.active {
        match secrets.value(AIRTABLE_ACTIVE_VIEW) {
            Ok(view) => Some(view.to_string()),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    } else {
        None
    };
    let count = match (&active_view, args.count) {
        (Some(_), _) => 1,
        (None, Some(count)) => count,
        (None, None) => prompt_line("How many records to post? ")
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1),
    };

    let services = match build_services(&secrets, &model, &trace_id) {
        Ok(services) => services,
        Err(err) => {
            error!(trace_id = %trace_id, error = %err, "❌ startup failed");
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    // Ctrl-C trips the flag of whichever run is active, then stops the loop.
    let interrupted = CancelFlag::new();
    let active: Arc<Mutex<Option<CancelFlag>>> = Arc::new(Mutex::new(None));
    {
        let interrupted = interrupted.clone();
        let active = Arc::clone(&active);
        if let Err(err) = ctrlc::set_handler(move || {
            interrupted.trip(CAUSE_INTERRUPTED);
            let slot = active.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(flag) = slot.as_ref() {
                flag.trip(CAUSE_INTERRUPTED);
            }
        }) {
            warn!(trace_id = %trace_id, error = %err, "⚠️ Ctrl-C handler not installed");
        }
    }

    let fetched = match &active_view {
        Some(view) => services
            .content_store
            .fetch_one_active(view)
            .map(|row| row.into_iter().collect::<Vec<_>>()),
        None => services.content_store.fetch_today_unposted(count),
    };
    let rows = match fetched {
        Ok(rows) => rows,
        Err(err) => {
            error!(trace_id = %trace_id, error = %err, "❌ failed to fetch today's rows");
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    if rows.is_empty() {
        info!(trace_id = %trace_id, model = %model, "no rows to post");
        return;
    }

    let total = rows.len();
    let mut posted = 0usize;
    for (index, row) in rows.iter().enumerate() {
        if interrupted.is_set() {
            warn!(trace_id = %trace_id, remaining = total - index, "⚠️ interrupted, skipping remaining rows");
            break;
        }
        let run_trace = new_trace_id();
        let cancel = CancelFlag::new();
        *active.lock().unwrap_or_else(|p| p.into_inner()) = Some(cancel.clone());
        info!(trace_id = %run_trace, record_id = %row.record_id, index = index + 1, total, "posting");
        let outcome = PostReelWorkflow::new(&config, &services, &project_root, &run_trace)
            .with_cancel(cancel)
            .run(row);
        *active.lock().unwrap_or_else(|p| p.into_inner()) = None;
        if outcome.success {
            posted += 1;
        } else {
            warn!(
                trace_id = %run_trace,
                record_id = %outcome.record_id,
                step = outcome.failed_step.as_deref().unwrap_or("-"),
                reason = outcome.reason.as_deref().unwrap_or("-"),
                "⚠️ row not posted"
            );
        }
    }
    info!(trace_id = %trace_id, model = %model, posted, total, "post-bot finished");
}
