pub mod token_counter;

use tracing_subscriber::EnvFilter;

/// Map a configured log level to an `EnvFilter` directive.
///
/// Accepts the usual tracing levels plus the aliases WARNING (warn) and
/// CRITICAL (error). DISABLED yields `None`.
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<&'static str> {
    match log_level.trim().to_uppercase().as_str() {
        "DISABLED" | "OFF" => None,
        "TRACE" => Some("trace"),
        "DEBUG" => Some("debug"),
        "WARN" | "WARNING" => Some("warn"),
        "ERROR" | "CRITICAL" => Some("error"),
        _ => Some("info"),
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG`, when set, wins over the configured level. Calling this twice
/// is harmless; the second install is ignored.
pub fn init_tracing(log_level: &str, json_logs: bool) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    let installed = if json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
