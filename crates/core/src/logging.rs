//! Logging setup on top of the tracing ecosystem.
//!
//! # Environment Variables
//!
//! - `TIDINGS_LOG`: Filter directive (like `RUST_LOG`), e.g., `tidings_agent=debug`
//! - `TIDINGS_LOG_FORMAT`: Output format for stderr: `pretty`, `json`, `compact`
//! - `TIDINGS_LOG_DIR`: Directory for file logs (default `~/.tidings/logs`)
//!
//! # Example
//!
//! ```no_run
//! use tidings_core::logging::{self, LogSettings};
//!
//! let _guard = logging::init_logging(Some(LogSettings::default().with_level("debug")))?;
//! # Ok::<(), tidings_core::Error>(())
//! ```

use crate::Error;
use crate::config::LoggingConfig;
use std::env;
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format for stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Pretty, human-readable output with colors (default for TTY)
    #[default]
    Pretty,
    /// JSON output (one line per event)
    Json,
    /// Compact, single-line output
    Compact,
}

impl LogFormat {
    /// All available log formats.
    pub const VALUES: &[LogFormat] = &[LogFormat::Pretty, LogFormat::Json, LogFormat::Compact];

    /// Parse a log format from a string.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Default filter directive for stderr output.
    pub level: String,
    /// Output format for stderr; `None` picks one from the terminal.
    pub format: Option<LogFormat>,
    /// Directory for the rolling JSON log file; `None` disables file output.
    pub file_dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "warn".to_string(), format: None, file_dir: None }
    }
}

impl LogSettings {
    /// Build settings from the `[logging]` config section.
    pub fn from_config(config: &LoggingConfig) -> Result<Self, Error> {
        let file_dir = if config.file.enabled {
            match &config.file.directory {
                Some(dir) => Some(dir.clone()),
                None => Some(Self::default_log_dir()?),
            }
        } else {
            None
        };

        Ok(Self { level: config.level.clone(), format: LogFormat::parse_str(&config.format), file_dir })
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_file_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_dir = Some(dir.into());
        self
    }

    fn build_env_filter(&self) -> EnvFilter {
        let filter = env::var("TIDINGS_LOG")
            .ok()
            .or_else(|| env::var("RUST_LOG").ok())
            .unwrap_or_else(|| self.level.clone());

        EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn"))
    }

    fn detect_format(&self) -> LogFormat {
        if let Ok(fmt_str) = env::var("TIDINGS_LOG_FORMAT")
            && let Some(fmt) = LogFormat::parse_str(&fmt_str)
        {
            return fmt;
        }

        if let Some(format) = self.format {
            return format;
        }

        if atty::is(atty::Stream::Stderr) { LogFormat::Pretty } else { LogFormat::Compact }
    }

    fn default_log_dir() -> Result<PathBuf, Error> {
        if let Ok(custom_dir) = env::var("TIDINGS_LOG_DIR") {
            return Ok(PathBuf::from(custom_dir));
        }

        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;

        Ok(PathBuf::from(home).join(".tidings").join("logs"))
    }
}

/// Initialize the global tracing subscriber.
///
/// Sets up an env-based filter, formatted stderr output and, when a file directory is
/// configured, a daily-rolling JSON log. The returned guard flushes the file writer and
/// must be kept alive for as long as file logging is wanted.
pub fn init_logging(settings: Option<LogSettings>) -> Result<Option<WorkerGuard>, Error> {
    let settings = settings.unwrap_or_default();
    let env_filter = settings.build_env_filter();
    let format = settings.detect_format();

    let registry = Registry::default().with(env_filter);

    let Some(log_dir) = &settings.file_dir else {
        let result = match format {
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_writer(io::stderr).with_ansi(true))
                .try_init(),
            LogFormat::Json => registry.with(fmt::layer().json().with_writer(io::stderr)).try_init(),
            LogFormat::Compact => registry.with(fmt::layer().compact().with_writer(io::stderr)).try_init(),
        };
        result.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir).map_err(|e| Error::Config(format!("Failed to create log directory: {}", e)))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "tidings.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let result = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(io::stderr).with_ansi(true))
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init(),
    };
    result.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(Some(guard))
}

/// Shorten user text before it goes into a log line.
pub fn redact_prompt(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }

    let mut truncated: String = content.chars().take(max_chars).collect();
    truncated.push_str(&format!("... ({} total chars)", total));
    truncated
}
