use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogSettings;

pub const LOG_FILE_NAME: &str = "polychat.log";

pub fn log_dir(conf_dir: &Path) -> PathBuf {
    conf_dir.join("logs")
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured
/// level; failures are reported on stderr and logging stays off.
///
/// The returned guard flushes the file writer when dropped.
pub fn init_tracing(conf_dir: &Path, settings: &LogSettings) -> Option<WorkerGuard> {
    let log_dir = log_dir(conf_dir);
    if let Err(error) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "warning: failed to create log dir {}: {error}",
            log_dir.display()
        );
        return None;
    }

    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking);
    let init_result = if settings.stdout {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init()
    };
    if let Err(error) = init_result {
        eprintln!(
            "warning: failed to initialize tracing subscriber for {}: {error}",
            log_dir.join(LOG_FILE_NAME).display()
        );
        return None;
    }
    Some(guard)
}
