use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const ENABLED_VAR: &str = "INVESTIGATION_STREAM_OBSERVABILITY";
const LEVEL_VAR: &str = "INVESTIGATION_STREAM_LOG_LEVEL";
const JSON_PATH_VAR: &str = "INVESTIGATION_STREAM_JSON_LOG_PATH";
const DEFAULT_JSON_LOG_FILE: &str = "investigation-stream.logs.jsonl";

/// Keeps the background file writer alive for the life of the process.
static FILE_WRITER: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    /// Compact text on stderr; stdout stays free for streamed output.
    Console,
    /// One JSON object per line, appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

impl LogSink {
    fn json_file(raw: &str) -> Self {
        let path = Path::new(raw.trim());
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_JSON_LOG_FILE)
            .to_string();
        Self::JsonFile { dir, file_name }
    }
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    /// Explicit filter directive; `None` defers to `RUST_LOG`, then `info`.
    directive: Option<String>,
    sink: LogSink,
}

impl LogSettings {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = match lookup(ENABLED_VAR).as_deref().map(parse_switch) {
            Some(Some(flag)) => flag,
            // Present but unparsable still counts as "on".
            _ => true,
        };
        let directive = lookup(LEVEL_VAR).filter(|level| !level.trim().is_empty());
        let sink = lookup(JSON_PATH_VAR)
            .filter(|path| !path.trim().is_empty())
            .map_or(LogSink::Console, |path| LogSink::json_file(&path));
        Self {
            enabled,
            directive,
            sink,
        }
    }

    fn filter(&self) -> EnvFilter {
        self.directive
            .as_deref()
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn install(settings: &LogSettings) -> Option<WorkerGuard> {
    let filter = settings.filter();
    match &settings.sink {
        LogSink::Console => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            None
        }
        LogSink::JsonFile { dir, file_name } => {
            if let Err(err) = std::fs::create_dir_all(dir) {
                eprintln!("investigation-stream: cannot create log directory {}: {err}", dir.display());
            }
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            Some(guard)
        }
    }
}

/// Installs the process-wide `tracing` subscriber once.
///
/// Environment variables:
/// - `INVESTIGATION_STREAM_OBSERVABILITY`: on/off switch (default on).
/// - `INVESTIGATION_STREAM_LOG_LEVEL`: filter directive (`info`, `investigation_stream=debug`, ...).
/// - `INVESTIGATION_STREAM_JSON_LOG_PATH`: write JSON lines to this file
///   instead of compact text on stderr.
/// - `RUST_LOG`: used when no level override is set.
///
/// Library code never calls this; binaries and examples do.
pub fn init_observability() {
    FILE_WRITER.get_or_init(|| {
        let settings = LogSettings::from_env();
        settings.enabled.then(|| install(&settings)).flatten()
    });
}
