//! Structured logging setup.
//!
//! Logs always go to stderr: the daemon's stdout is reserved for the
//! readiness line its parent waits on.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a global tracing subscriber built from `config`.
///
/// `RUST_LOG` overrides `config.log_level` when set. Installing twice is a
/// no-op, so tests can call this freely.
pub fn init_logging(config: &LoggingConfig) {
    if !config.log_to_console {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if installed.is_ok() {
        tracing::debug!(app = %config.app_name, "logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
