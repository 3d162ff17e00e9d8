//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber: JSON or
//! pretty formatting with env-filter overrides, optional non-blocking
//! file output.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::domain::models::LoggingConfig;

/// Initialize the global subscriber. Returns the appender guard when file
/// output is configured; hold it for the process lifetime.
pub fn init(config: &LoggingConfig, log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let default_level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(log_dir, "fluxgate.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true);
        if config.format == "json" {
            builder.json().init();
        } else {
            builder.init();
        }
        return Ok(Some(guard));
    }

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true);
    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(None)
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("Unknown log level: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_parse() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert!(parse_log_level("loud").is_err());
    }
}
