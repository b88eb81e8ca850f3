use docingest_core::config::LoggingConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Directory and file name for the appender. A bare file name logs to `.`.
fn split_log_path(path: &Path) -> (PathBuf, OsString) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("docingest.log"));
    (dir, name)
}

/// Install the subscriber. The returned guard flushes the file writer on drop.
pub fn init_logger(config: &LoggingConfig) -> WorkerGuard {
    let filter_layer = EnvFilter::try_new(&config.level).unwrap_or_else(|e| {
        eprintln!("Invalid log level {:?} ({}), using info", config.level, e);
        EnvFilter::new("info")
    });

    let (dir, name) = split_log_path(&config.file_path);
    let file_appender = tracing_appender::rolling::never(&dir, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = config.stdout.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .pretty()
            .with_file(false)
            .without_time()
            .with_ansi(true)
    });

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter_layer)
        .init();

    info!("Logging at {} to {}", config.level, config.file_path.display());

    guard
}
