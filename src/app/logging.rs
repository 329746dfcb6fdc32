use tracing_subscriber::EnvFilter;

pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reel_pilot_lib=debug"));

    if cfg!(debug_assertions) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_names(true)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_target(false)
            .with_current_span(false)
            .try_init();
    }
}

/// Fresh correlation id for one bot run or one command.
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn resolve_trace_id(input: Option<String>) -> String {
    match input {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => new_trace_id(),
    }
}
