//! Log setup for the room client.
//!
//! Frames are traced at `debug` by `yt_socket`, state transitions at `info`.
//! Console output goes to stderr so `auth generate` can print tokens on
//! stdout. A daily-rolling file under the configured log directory gets the
//! same events, as plain text or JSON lines.

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{YtError, YtResult};

/// Prefix of the rolling log file; the appender adds the date.
pub const LOG_FILE_PREFIX: &str = "yellotalk.log";

/// Transport crates that log every frame and handshake at debug level.
const NOISY_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "rustls"];

/// Filter directive for `level`. Transport internals stay at `warn` unless
/// the directive names them itself.
pub fn filter_directive(level: &str) -> String {
    let level = level.trim();
    let level = if level.is_empty() { "info" } else { level };
    let mut directive = level.to_string();
    for target in NOISY_TARGETS {
        let named = level
            .split(',')
            .any(|part| part.trim().split('=').next() == Some(*target));
        if !named {
            directive.push_str(&format!(",{target}=warn"));
        }
    }
    directive
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(filter_directive(level)).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: compact stderr output plus a daily log
/// file in `log_dir`, written as JSON lines when `json_output` is set.
///
/// `level` is an `EnvFilter` directive such as `info` or `yt_socket=debug`.
/// Fails if a subscriber is already installed.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> YtResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();
    let json_file = json_output.then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .json()
            .with_current_span(false)
            .with_thread_ids(true)
    });
    let text_file = (!json_output).then(|| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(console)
        .with(json_file)
        .with(text_file)
        .try_init()
        .map_err(|e| YtError::Internal(format!("logging already initialized: {e}")))?;

    tracing::info!(dir = %log_dir.display(), json = json_output, "logging to {LOG_FILE_PREFIX}");
    Ok(LogGuard { _guard: guard })
}

/// Keeps the background file writer running. Dropping it flushes the file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Stderr-only logging for tests. Later calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_quiets_transport_crates() {
        assert_eq!(
            filter_directive("debug"),
            "debug,tungstenite=warn,tokio_tungstenite=warn,rustls=warn"
        );
        assert_eq!(
            filter_directive(""),
            "info,tungstenite=warn,tokio_tungstenite=warn,rustls=warn"
        );
    }

    #[test]
    fn test_filter_respects_explicit_targets() {
        assert_eq!(
            filter_directive("info,tungstenite=trace"),
            "info,tungstenite=trace,tokio_tungstenite=warn,rustls=warn"
        );
    }

    #[test]
    fn test_console_logging_twice_is_harmless() {
        init_console_logging("yt_socket=debug");
        init_console_logging("debug");
    }
}
