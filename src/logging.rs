use std::io;

use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat};

/// Bare levels apply to this crate only; anything else is taken as a full
/// `EnvFilter` directive.
pub fn filter_directive(level: &str) -> String {
    let level = level.trim();
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => {
            format!("plangraph={}", level.to_ascii_lowercase())
        }
        _ => level.to_string(),
    }
}

/// Installs the stderr subscriber. Safe to call more than once; later calls
/// keep the first subscriber.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), ConfigError> {
    let env_filter =
        EnvFilter::try_new(filter_directive(level)).map_err(|err| ConfigError::InvalidValue {
            key: "logging.level",
            message: err.to_string(),
        })?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Compact => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_target(false);
            registry.with(layer).try_init()
        }
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_current_span(false);
            registry.with(layer).try_init()
        }
    };
    if installed.is_ok() {
        tracing::debug!(
            version = env!("CARGO_PKG_VERSION"),
            format = format.as_str(),
            "logging initialized"
        );
    }
    Ok(())
}
