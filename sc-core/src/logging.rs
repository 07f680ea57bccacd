//! Structured logging setup using the `tracing` ecosystem.
//!
//! The client itself only emits `tracing` events; hosts that have no
//! subscriber of their own can install one from here.

use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{ChatError, ChatResult};

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber from a [`LoggingConfig`].
///
/// Console output always goes to stderr. When `config.directory` is set, a
/// daily-rotated `stream-chat.log` is written there as well (JSON lines when
/// `json_output` is enabled). `RUST_LOG` overrides `config.level`.
pub fn init_logging(config: &LoggingConfig) -> ChatResult<LogGuard> {
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    if config.directory.is_empty() {
        tracing_subscriber::registry()
            .with(env_filter(&config.level))
            .with(console_layer)
            .try_init()
            .map_err(|e| ChatError::Config(format!("logging already initialized: {e}")))?;
        return Ok(LogGuard { _guard: None });
    }

    let log_dir = Path::new(&config.directory);
    std::fs::create_dir_all(log_dir)?;
    let (non_blocking, guard) =
        tracing_appender::non_blocking(rolling::daily(log_dir, "stream-chat.log"));

    let registry = tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(console_layer);

    let result = if config.json_output {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init()
    };
    result.map_err(|e| ChatError::Config(format!("logging already initialized: {e}")))?;

    tracing::info!(
        "logging initialized at level={}, dir={}",
        config.level,
        log_dir.display()
    );

    Ok(LogGuard {
        _guard: Some(guard),
    })
}

/// Initialize a minimal console-only logger for tests or simple hosts.
/// Subsequent calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(true).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_logging_is_idempotent() {
        init_console_logging("debug");
        init_console_logging("trace");
    }

    #[test]
    fn test_second_init_reports_error() {
        init_console_logging("info");
        let err = init_logging(&LoggingConfig::default());
        assert!(matches!(err, Err(ChatError::Config(_))));
    }
}
