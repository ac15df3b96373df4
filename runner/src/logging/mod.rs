//! Logging module for dockside
//!
//! Structured logging with tracing: pretty output when stderr is a terminal,
//! JSON otherwise. Logs always go to stderr; stdout carries the operation's
//! own output.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a configured level name onto a tracing level, defaulting to info
pub fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the logging/tracing system
pub fn init_logging(log_level: &str) -> Result<()> {
    let level = parse_level(log_level);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dockside={}", level)));

    if stderr_is_terminal() {
        let layer = fmt::layer()
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    }

    Ok(())
}

fn stderr_is_terminal() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::isatty(libc::STDERR_FILENO) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
