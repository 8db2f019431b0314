use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Layers a non-blocking daily-rolling file appender under an ANSI stdout
/// layer, both gated by `RUST_LOG` (or `info` if unset). The returned
/// guard must be kept alive for the process lifetime or buffered lines are
/// dropped on exit.
pub fn init(log_dir: &str, log_file: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_target(false).with_writer(non_blocking).with_ansi(false);
    let stdout_layer = fmt::layer().with_target(false);

    tracing_subscriber::registry().with(filter).with(file_layer).with(stdout_layer).init();

    guard
}
