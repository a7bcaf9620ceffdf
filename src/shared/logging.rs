//! Timestamped stderr lines for CLI progress and configuration loading.
//! Library internals log through `tracing` instead.

use chrono::Local;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render one line as `[timestamp] [cmsync] [level] message`
pub fn format_line(level: LogLevel, message: &str) -> String {
    format!(
        "[{}] [cmsync] [{}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        level,
        message
    )
}

/// Write one line to stderr
pub fn log(level: LogLevel, message: &str) {
    eprintln!("{}", format_line(level, message));
}

/// Details such as which environment override was applied
pub fn debug(message: &str) {
    log(LogLevel::Debug, message);
}

/// Progress of a CLI command
pub fn info(message: &str) {
    log(LogLevel::Info, message);
}

/// Recoverable problems, e.g. an ignored configuration value
pub fn warn(message: &str) {
    log(LogLevel::Warning, message);
}

/// Failure of a CLI command
pub fn error(message: &str) {
    log(LogLevel::Error, message);
}

/// Mask a secret for display, keeping at most eight characters of its length
pub fn redact(secret: &str) -> String {
    "*".repeat(secret.chars().count().min(8))
}
