//! Logging setup
//!
//! Console output and an optional daily-rotated log file, both built on
//! `tracing-subscriber`. Components log through [`StructuredLogger`], which
//! tags every line with the component and loadpoint.

use crate::config::LoggingConfig;
use crate::error::{HeliosError, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Once;
use tracing::{Level, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod structured;

pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

// Keep the non-blocking worker guard alive for the entire process lifetime
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();

/// Install the global subscriber. Later calls return the first result.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        if let Err(e) = install(config) {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    match INIT_ERROR.get() {
        Some(err) => Err(HeliosError::config(err.clone())),
        None => Ok(()),
    }
}

fn install(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let console_level = level_override(config.console_level.as_deref(), level);
    let file_level = level_override(config.file_level.as_deref(), level);

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut log_dir_used = None;

    if file_logging_enabled() {
        let dir = log_dir(Path::new(&config.file));
        let appender = rolling::Builder::new()
            .rotation(rolling::Rotation::DAILY)
            .filename_prefix("helios")
            .filename_suffix("log")
            .max_log_files(config.backup_count as usize)
            .build(dir)
            .map_err(|e| HeliosError::io(format!("Failed to create log file appender: {}", e)))?;

        let (writer, guard) = non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        layers.push(output_layer(writer, config.json_format, file_level));
        log_dir_used = Some(dir.display().to_string());
    }

    // without a file the console is the only output
    if config.console_output || log_dir_used.is_none() {
        layers.push(output_layer(std::io::stdout, config.json_format, console_level));
    }

    // per-output filters narrow down from the most verbose level
    let filter = env_filter(console_level.max(file_level));

    // A global subscriber may already be installed, e.g. by a test harness
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();

    match log_dir_used {
        Some(dir) => info!(
            "Logging initialized - console_level: {:?}, file_level: {:?}, dir: {}",
            console_level, file_level, dir
        ),
        None => info!(
            "Logging initialized - console_level: {:?}, console-only",
            console_level
        ),
    }
    Ok(())
}

fn output_layer<W>(writer: W, json: bool, level: Level) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    let filter = LevelFilter::from_level(level);

    if json {
        layer.json().with_filter(filter).boxed()
    } else {
        layer.with_filter(filter).boxed()
    }
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env("HELIOS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| format!("helios={}", level).into())
}

fn file_logging_enabled() -> bool {
    !cfg!(test) && std::env::var_os("HELIOS_DISABLE_FILE_LOG").is_none()
}

/// Directory for rotated files; a configured file name selects its parent
fn log_dir(path: &Path) -> &Path {
    if path.extension().is_some() {
        path.parent().unwrap_or(path)
    } else {
        path
    }
}

/// Optional per-output level, falling back to `base` when unset or invalid
fn level_override(level: Option<&str>, base: Level) -> Level {
    level.and_then(|s| parse_log_level(s).ok()).unwrap_or(base)
}

/// Parse log level string to tracing Level
pub fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(HeliosError::config(format!(
            "Invalid log level: {}",
            level_str
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn level_override_falls_back() {
        assert_eq!(level_override(Some("debug"), Level::INFO), Level::DEBUG);
        assert_eq!(level_override(Some("loud"), Level::INFO), Level::INFO);
        assert_eq!(level_override(None, Level::WARN), Level::WARN);
        // the global filter has to admit the more verbose output
        assert_eq!(Level::INFO.max(Level::DEBUG), Level::DEBUG);
    }

    #[test]
    fn log_dir_from_file_or_directory() {
        assert_eq!(log_dir(Path::new("/var/log/helios.log")), Path::new("/var/log"));
        assert_eq!(log_dir(Path::new("/var/log/helios")), Path::new("/var/log/helios"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
