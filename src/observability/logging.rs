use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "seqmeta.log";

/// Console output on stderr plus a daily-rotated JSON log in `log_dir`.
///
/// `RUST_LOG` wins over `default_directive` when set. The returned guard
/// flushes the file writer on drop, so hold it until the run is over.
pub fn init_logging(log_dir: &Path, default_directive: &str) -> WorkerGuard {
    // the file layer silently writes nothing if this fails; console still works
    let _ = fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(file_writer);
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}

/// Filter directive for the given verbosity: info, then debug, then trace
pub fn directive_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "seqmeta=info,warn",
        1 => "seqmeta=debug,info",
        _ => "seqmeta=trace,debug",
    }
}
