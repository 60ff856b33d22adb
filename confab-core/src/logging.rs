use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize structured logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level so operators can
/// override filtering without touching configuration files.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_line_number(true)
                .with_file(true);
            registry.with(layer).try_init()?;
        }
        LogFormat::Pretty => {
            let layer = fmt::layer().pretty().with_target(true);
            registry.with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Validate that the leading directive of a filter string is a known level.
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    let head = level.split(',').next().unwrap_or(level);
    let head = head.rsplit('=').next().unwrap_or(head);
    match head.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_levels() {
        assert!(parse_log_level("trace").is_ok());
        assert!(parse_log_level("debug").is_ok());
        assert!(parse_log_level("info").is_ok());
        assert!(parse_log_level("warn").is_ok());
        assert!(parse_log_level("error").is_ok());
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn parses_module_directives() {
        assert!(parse_log_level("confab_sfu=debug").is_ok());
        assert!(parse_log_level("debug,webrtc=warn").is_ok());
    }
}
