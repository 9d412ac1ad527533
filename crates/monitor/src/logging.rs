//! Logging setup

use crate::MonitorError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// `RUST_LOG` if set, else `level`
fn build_filter(level: &str) -> Result<EnvFilter, MonitorError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| MonitorError::Configuration(format!("invalid log level {level:?}: {e}"))),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), MonitorError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level)?)
        .with_target(true);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| MonitorError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("warn,stream_capture=debug").is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging("info", LogFormat::Pretty);
        assert!(matches!(
            init_logging("info", LogFormat::Json),
            Err(MonitorError::Logging(_))
        ));
    }
}
