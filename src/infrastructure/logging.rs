//! Logger initialization using tracing.

use anyhow::{anyhow, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::LoggingConfig;

/// Holds the file-appender guard so buffered log lines flush on drop.
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the global subscriber from config. Call once at startup.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let guard = if let Some(ref log_dir) = config.log_dir {
            let file_appender = rolling::daily(log_dir, "lattice.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            // File output is always JSON for structured ingestion.
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter);

            tracing_subscriber::registry().with(file_layer).try_init()?;
            Some(guard)
        } else {
            match config.format.as_str() {
                "json" => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_filter(env_filter);
                    tracing_subscriber::registry().with(stdout_layer).try_init()?;
                }
                _ => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_filter(env_filter);
                    tracing_subscriber::registry().with(stdout_layer).try_init()?;
                }
            }
            None
        };

        Ok(Self { _guard: guard })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("invalid log level: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert!(parse_log_level("verbose").is_err());
    }
}
