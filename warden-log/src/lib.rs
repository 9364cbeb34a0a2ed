//! Warden Diagnostics
//!
//! Process-scoped diagnostic sink used by the Warden lock primitives to
//! publish stall reports and lease-renewal warnings.
//!
//! # Features
//!
//! - **Environment-controlled**: `WARDEN_DIAGNOSTICS=1` enables the sink
//! - **Injected, not ambient**: primitives hold a [`DiagnosticSink`] handle
//! - **Dated log files**: optional per-invocation `deadlock-*.log` file
//! - **Terminal friendly**: timestamped, colorized warnings
//!
//! # Usage
//!
//! ```rust
//! use warden_log::{DiagnosticSink, DiagnosticsConfig, Level};
//!
//! let sink = DiagnosticSink::open(DiagnosticsConfig::enabled("orders")).unwrap();
//! sink.report(Level::Warn, "lock held for too long");
//! ```
//!
//! # Environment Variables
//!
//! - `WARDEN_DIAGNOSTICS=1` - Enable the diagnostic sink
//! - `WARDEN_LOG_LEVEL=debug|info|warn|error` - Minimum level written
//! - `WARDEN_LOG_COLOR=1|0` - Enable/disable colors
//! - `WARDEN_DIAGNOSTICS_LABEL=name` - Label used in the log file name
//! - `WARDEN_DIAGNOSTICS_DIR=path` - Directory for the dated log file

use chrono::{DateTime, Local};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::env;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Timestamp layout used for every diagnostic line.
pub const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Default time a waiter may spin before a stall report is emitted.
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(5);

/// Diagnostic sink errors.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log file could not be created.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The process-wide sink was already configured.
    #[error("diagnostic sink already initialized")]
    AlreadyInitialized,
}

// ============================================================================
// Log Levels
// ============================================================================

/// Log level for diagnostic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level (least verbose)
    Error = 4,
    /// Off (no logging)
    Off = 5,
}

impl Level {
    /// Get level from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Get level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Diagnostic sink configuration.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// Whether diagnostics are written at all
    pub enabled: bool,
    /// Minimum level written to the sink
    pub level: Level,
    /// Whether terminal output is colorized
    pub color: bool,
    /// Label embedded in the log file name
    pub label: String,
    /// Directory for the dated log file; `None` keeps output on stdout only
    pub log_dir: Option<PathBuf>,
    /// How long a waiter spins before a stall report is emitted
    pub stall_threshold: Duration,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: Level::Warn,
            color: atty::is(atty::Stream::Stdout),
            label: "warden".to_string(),
            log_dir: None,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }
}

impl DiagnosticsConfig {
    /// Enabled configuration writing to stdout. Add
    /// [`with_log_dir`](Self::with_log_dir) for the dated log file.
    pub fn enabled(label: impl Into<String>) -> Self {
        Self {
            enabled: true,
            label: label.into(),
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.enabled = env::var("WARDEN_DIAGNOSTICS")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        if let Some(level) = env::var("WARDEN_LOG_LEVEL")
            .ok()
            .and_then(|s| Level::parse(&s))
        {
            config.level = level;
        }

        if let Ok(color) = env::var("WARDEN_LOG_COLOR") {
            config.color = color == "1" || color.to_lowercase() == "true";
        }

        if let Ok(label) = env::var("WARDEN_DIAGNOSTICS_LABEL") {
            config.label = label;
        }

        config.log_dir = env::var("WARDEN_DIAGNOSTICS_DIR").ok().map(PathBuf::from);

        config
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Enable or disable colors.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Write the dated log file into `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Set the stall threshold.
    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }
}

/// Check if TTY (for color detection fallback).
mod atty {
    pub enum Stream {
        Stdout,
    }

    pub fn is(_stream: Stream) -> bool {
        std::env::var("NO_COLOR").is_err() && std::env::var("TERM").is_ok()
    }
}

/// Name of the per-invocation log file.
pub fn log_file_name(label: &str, now: DateTime<Local>) -> String {
    format!("deadlock-{}-{}.log", label, now.format("%Y%m%d%H%M%S%.3f"))
}

// ============================================================================
// Sink
// ============================================================================

struct SinkInner {
    config: DiagnosticsConfig,
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

/// Read-only handle to a configured diagnostic sink.
///
/// Cloning is cheap; all clones write to the same outputs.
#[derive(Clone)]
pub struct DiagnosticSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticSink")
            .field("enabled", &self.inner.config.enabled)
            .field("path", &self.inner.path)
            .finish()
    }
}

impl DiagnosticSink {
    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                config: DiagnosticsConfig::default(),
                file: None,
                path: None,
            }),
        }
    }

    /// Configure a sink, opening the dated log file when diagnostics are
    /// enabled and a directory is set.
    pub fn open(config: DiagnosticsConfig) -> Result<Self, LogError> {
        let (file, path) = match (&config.log_dir, config.enabled) {
            (Some(dir), true) => {
                let path = dir.join(log_file_name(&config.label, Local::now()));
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?;
                tracing::debug!(path = %path.display(), "opened diagnostic log file");
                (Some(Mutex::new(file)), Some(path))
            }
            _ => (None, None),
        };

        Ok(Self {
            inner: Arc::new(SinkInner { config, file, path }),
        })
    }

    /// Whether anything is written at all.
    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Threshold after which spinning waiters report a stall.
    pub fn stall_threshold(&self) -> Duration {
        self.inner.config.stall_threshold
    }

    /// Path of the dated log file, if one is open.
    pub fn log_path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// The configuration this sink was opened with.
    pub fn config(&self) -> &DiagnosticsConfig {
        &self.inner.config
    }

    /// Write a message at `level`.
    pub fn report(&self, level: Level, message: &str) {
        let config = &self.inner.config;
        if !config.enabled || level < config.level || level == Level::Off {
            return;
        }

        let line = format_line(level, message);

        {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{}", paint(level, &line, config.color));
        }

        if let Some(file) = &self.inner.file {
            let mut file = file.lock();
            let _ = writeln!(file, "{}", line);
            let _ = file.flush();
        }
    }

    /// Write a warning.
    pub fn warn(&self, message: &str) {
        self.report(Level::Warn, message);
    }
}

/// Render `[timestamp LEVEL] message`.
pub fn format_line(level: Level, message: &str) -> String {
    format!(
        "[{} {}] {}",
        Local::now().format(TIMESTAMP_LAYOUT),
        level.as_str(),
        message
    )
}

#[cfg(feature = "color")]
fn paint(level: Level, line: &str, color: bool) -> String {
    use colored::Colorize;
    if !color {
        return line.to_string();
    }
    match level {
        Level::Trace | Level::Debug => line.dimmed().to_string(),
        Level::Info => line.green().to_string(),
        Level::Warn => line.bright_yellow().bold().to_string(),
        Level::Error | Level::Off => line.red().bold().to_string(),
    }
}

#[cfg(not(feature = "color"))]
fn paint(_level: Level, line: &str, _color: bool) -> String {
    line.to_string()
}

// ============================================================================
// Process-wide sink
// ============================================================================

static GLOBAL: OnceCell<DiagnosticSink> = OnceCell::new();

/// Configure the process-wide sink. It can be configured only once.
pub fn init_global(config: DiagnosticsConfig) -> Result<&'static DiagnosticSink, LogError> {
    if GLOBAL.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }
    let sink = DiagnosticSink::open(config)?;
    GLOBAL
        .set(sink)
        .map_err(|_| LogError::AlreadyInitialized)?;
    GLOBAL.get().ok_or(LogError::AlreadyInitialized)
}

/// Configure the process-wide sink from `WARDEN_*` environment variables.
pub fn init_from_env() -> Result<&'static DiagnosticSink, LogError> {
    init_global(DiagnosticsConfig::from_env())
}

/// The process-wide sink, if one was configured.
pub fn global() -> Option<&'static DiagnosticSink> {
    GLOBAL.get()
}

// ============================================================================
// Tracing Integration
// ============================================================================

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! Tracing compatibility layer.

    use super::*;

    /// Create a tracing subscriber filtered at the configured level.
    pub fn subscriber(config: &DiagnosticsConfig) -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let level = match config.level {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(config.color))
    }
}

// ============================================================================
// Tests
// ============================================================================
