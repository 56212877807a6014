use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Local};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file for a run started at `started`, e.g. `logs/20260105-0620`.
pub fn log_file_path(log_dir: &Path, started: DateTime<Local>) -> PathBuf {
    log_dir.join(started.format("%Y%m%d-%H%M").to_string())
}

pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Console plus per-run file logging. `RUST_LOG` wins over the default
/// level. Returns the log file path when one could be opened.
pub fn init(log_dir: &Path, debug: bool) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let path = log_file_path(log_dir, Local::now());
    let (file_layer, file_error) = match open_log_file(&path) {
        Ok(file) => {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        Err(err) => (None, Some(err)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    match file_error {
        None => Some(path),
        Some(err) => {
            tracing::warn!(path = %path.display(), "logging to console only: {err}");
            None
        }
    }
}
