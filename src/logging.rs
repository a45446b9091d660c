//! Logger capability consumed by the filesystem and its connection manager.
//!
//! The default implementation forwards everything to `tracing`, so a process
//! that installs a subscriber (see [`init_tracing`]) gets the logs for free.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

/// Structured record emitted after every filesystem operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationLog {
    pub operation: &'static str,
    pub location: String,
    pub provider: String,
    pub duration: Duration,
    pub status: OperationStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "SUCCESS",
            OperationStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for OperationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} {:>8}µs {} {} {}",
            self.provider,
            self.duration.as_micros(),
            self.operation,
            self.location,
            self.status.as_str()
        )?;
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);

    fn operation(&self, log: &OperationLog) {
        self.debug(&log.to_string());
    }
}

/// Forwards to the global `tracing` dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        debug!("{}", message);
    }

    fn info(&self, message: &str) {
        info!("{}", message);
    }

    fn warn(&self, message: &str) {
        warn!("{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }

    fn operation(&self, log: &OperationLog) {
        debug!(
            operation = log.operation,
            location = %log.location,
            provider = %log.provider,
            duration_us = log.duration.as_micros() as u64,
            status = log.status.as_str(),
            message = log.message.as_deref().unwrap_or(""),
            "filesystem operation"
        );
    }
}

/// Installs the process-wide fmt subscriber at the given level name.
pub fn init_tracing(level: &str) -> crate::Result<()> {
    let log_level = match level {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| crate::Error::Config(format!("cannot install tracing subscriber: {e}")))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_log_display_includes_status_and_message() {
        let log = OperationLog {
            operation: "STAT",
            location: "docs/readme.md".to_string(),
            provider: "s3".to_string(),
            duration: Duration::from_micros(1500),
            status: OperationStatus::Error,
            message: Some("not found".to_string()),
        };
        let line = log.to_string();
        assert!(line.contains("1500µs"));
        assert!(line.contains("STAT docs/readme.md ERROR (not found)"));
    }
}
