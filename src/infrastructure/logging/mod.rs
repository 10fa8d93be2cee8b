// Logging module - Logging infrastructure
use crate::domain::error::{ReplComError, ReplComResult};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pick the effective level from the configured one and the command line flags.
pub fn effective_level(configured: &str, verbose: u8, quiet: bool) -> String {
    if quiet {
        return "error".to_string();
    }
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Initialize logging system
///
/// `RUST_LOG` wins over `level` when it is set. Logs go to stderr so they
/// never mix with device output on stdout.
pub fn init_logging(level: &str) -> ReplComResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("replcom={},warn", level)))
        .map_err(|e| ReplComError::Config {
            message: format!("Invalid log level '{}': {}", level, e),
        })?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| ReplComError::Config {
            message: format!("Logging already initialized: {}", e),
        })?;

    tracing::debug!("Logging initialized at level {}", level);
    Ok(())
}
