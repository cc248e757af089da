//! Logging setup for the client binary.

use anyhow::Result;
use save_engine::Localization;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::dirs;

/// Log to stderr and to `<log dir>/savegame.log`.
///
/// `RUST_LOG` overrides the filter. `SAVE_VERBOSE=1` lowers the default
/// level from info to debug. Keep the returned guard alive until exit so the
/// file writer drains.
pub fn setup_logging() -> Result<Option<WorkerGuard>> {
    let default_level = if verbose_enabled() {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    // A log directory that cannot be created only costs the file layer.
    let log_dir = dirs::log_dir();
    let (file_layer, guard) = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(&log_dir, "savegame.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!("Log file: {}/savegame.log", log_dir.display());
    Ok(guard)
}

fn verbose_enabled() -> bool {
    std::env::var("SAVE_VERBOSE")
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Reports language resets; the CLI has no localized strings of its own.
pub struct LogLocalization;

impl Localization for LogLocalization {
    fn set_language(&self, code: &str) {
        tracing::info!("Language reset to {}", code);
    }
}
