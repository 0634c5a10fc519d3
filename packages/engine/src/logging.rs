use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ENGINE_TARGETS: [&str; 2] = ["supaquiz_engine", "supaquiz_dkt"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Base `EnvFilter` directives, `RUST_LOG` syntax.
    pub level: String,
    /// Daily-rotated `engine.log` files are written here when set.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self {
            level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            file_dir: std::env::var("ENGINE_LOG_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Filter directives for a CLI verbosity offset: negative quiets everything
/// down to warnings, positive raises the engine crates to debug then trace.
pub fn filter_directives(level: &str, verbosity: i8) -> String {
    let level = if level.trim().is_empty() { "info" } else { level.trim() };
    match verbosity {
        v if v < 0 => "warn".to_string(),
        0 => level.to_string(),
        v => {
            let engine_level = if v == 1 { "debug" } else { "trace" };
            ENGINE_TARGETS
                .iter()
                .fold(level.to_string(), |acc, target| format!("{acc},{target}={engine_level}"))
        }
    }
}

pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn file_layer_writer(dir: &Path) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {}: {err}", dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, "engine.log");
    Some(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber. Console output goes to stderr so JSON on
/// stdout stays machine-readable; command spans report their duration on close.
pub fn init_tracing(settings: &LogSettings, verbosity: i8) -> Option<FileLogGuard> {
    let directives = filter_directives(&settings.level, verbosity);
    let env_filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_target(verbosity > 0)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    let file = settings.file_dir.as_deref().and_then(file_layer_writer);
    let (file_layer, guard) = match file {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE);
            (Some(layer), Some(FileLogGuard { _guard: guard }))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
