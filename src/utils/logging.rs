use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// File name used by the daily rolling log inside the configured directory.
pub const LOG_FILE_NAME: &str = "mqgate.log";

/// Initialize tracing/logging for the application.
///
/// Events go to stderr so stdout stays free for command output. When
/// `directory` is set, the same events are also written to a daily rolling
/// file there; the returned guard must be kept alive for the lifetime of the
/// process or buffered lines are lost on exit.
pub fn init(default_level: &str, directory: Option<&Path>) -> Option<WorkerGuard> {
    let lvl = parse_level(default_level);

    // Use try_init so tests and libraries can call this multiple times without panicking
    match directory {
        None => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(lvl)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_max_level(lvl)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(file_writer))
                .try_init();
            Some(guard)
        }
    }
}

pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
