//! Logging infrastructure - structured tracing throughout the allocator
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Per-layer targets (`vmarena::vm`, `vmarena::arena`, `vmarena::temp`, ...)
//! - Zero-cost when disabled
//! - Console or file output, human-readable or JSON
//!
//! Hot paths (block and arena allocation) only emit `trace` events.

use once_cell::sync::OnceCell;
use std::io;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LogSection;
use crate::error::{Error, Result};
use crate::tracker::LeakReport;

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console output when `None`
    pub log_path: Option<PathBuf>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // VMARENA_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("VMARENA_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // VMARENA_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("VMARENA_LOG_FILE") {
            config.log_path = Some(PathBuf::from(path));
        }

        config.json_format = std::env::var("VMARENA_LOG_JSON").is_ok();
        config.show_spans = std::env::var("VMARENA_LOG_SPANS").is_ok();

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some(PathBuf::from("vmarena.log")),
            json_format: false,
            show_spans: true,
        }
    }
}

impl From<&LogSection> for LogConfig {
    fn from(section: &LogSection) -> Self {
        Self {
            level: parse_level(&section.level).unwrap_or(Level::INFO),
            log_path: section.file.clone(),
            json_format: section.json,
            show_spans: section.spans,
        }
    }
}

/// `trace`, `debug`, `info`, `warn` or `error`, case-insensitive.
pub fn parse_level(level: &str) -> Option<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() -> Result<()> {
    init_with_config(LogConfig::from_env())
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber; later calls return `Ok`.
pub fn init_with_config(config: LogConfig) -> Result<()> {
    LOGGER_INITIALIZED
        .get_or_try_init(|| {
            let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(format!("vmarena={}", config.level.as_str().to_lowercase()))
            });

            let span_events = if config.show_spans {
                FmtSpan::ENTER | FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            };

            let writer = make_writer(config.log_path.as_deref())?;
            let ansi = config.log_path.is_none();

            let (json, text) = if config.json_format {
                let layer = fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_span_events(span_events)
                    .with_target(true);
                (Some(layer), None)
            } else {
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_span_events(span_events)
                    .with_target(true)
                    .with_thread_ids(cfg!(debug_assertions))
                    .with_line_number(cfg!(debug_assertions));
                (None, Some(layer))
            };

            // The host application may already own the global default.
            let installed = tracing_subscriber::registry()
                .with(env_filter)
                .with(json)
                .with(text)
                .try_init();
            if let Err(err) = installed {
                tracing::debug!(
                    target: "vmarena::logging",
                    error = %err,
                    "global subscriber already set, keeping it"
                );
            }
            Ok(())
        })
        .map(|_| ())
}

fn make_writer(path: Option<&Path>) -> Result<BoxMakeWriter> {
    let Some(path) = path else {
        return Ok(BoxMakeWriter::new(io::stderr));
    };

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::LogFile(format!("{} has no file name", path.display())))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| Error::LogFile(format!("{}: {}", path.display(), e)))?;
    Ok(BoxMakeWriter::new(appender))
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Allocator lifecycle events
// ============================================================================

/// Log context construction
pub fn log_context_init(page_size: usize, allocation_granularity: usize) {
    use tracing::info;
    info!(
        target: "vmarena::context",
        event = "context_init",
        page_size,
        allocation_granularity,
        "memory context ready"
    );
}

/// Log the outcome of context teardown
pub fn log_leak_report(report: &LeakReport) {
    use tracing::{info, warn};

    for record in report.leaks() {
        warn!(
            target: "vmarena::tracker",
            event = "leak",
            address = format_args!("{:#x}", record.address),
            size_bytes = record.size,
            "reservation leaked"
        );
    }

    info!(
        target: "vmarena::context",
        event = "context_cleanup",
        outstanding = report.records().len(),
        leaked_bytes = report.leaked_bytes(),
        "memory context torn down"
    );
}
