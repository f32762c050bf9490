use tracing_subscriber::EnvFilter;

use crate::metering::Direction;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Log a usage entry at the moment its counter is finalized.
pub fn log_usage_finished(code: &str, direction: Direction, amount: u64) {
    tracing::info!(
        code = code,
        direction = direction.as_str(),
        amount = amount,
        "usage counter finished"
    );
}
