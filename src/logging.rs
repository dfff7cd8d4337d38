//! Run logging to the console and an append-only log file.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Build a subscriber writing to stdout and, when it can be opened, to the
/// log file. `RUST_LOG` overrides `level`.
pub fn subscriber(level: &str, log_file: Option<&Path>) -> impl Subscriber + Send + Sync + 'static {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = log_file.and_then(open_append).map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
}

/// Install the global subscriber. Does nothing if one is already set.
pub fn init(level: &str, log_file: &Path) {
    let _ = subscriber(level, Some(log_file)).try_init();
}

/// Open a log file for appending, creating it if needed.
///
/// Failures are reported on stderr and never propagated.
fn open_append(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!(
                "warning: cannot open log file {}: {}; logging to console only",
                path.display(),
                e
            );
            None
        }
    }
}
