// 📣 Logging - tracing subscriber setup for the `migrate` binary
//
// RUST_LOG wins over the configured level when set.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// Machine readable
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub with_ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: Level::INFO,
            format: LogFormat::default(),
            with_ansi: true,
        }
    }
}

impl LogConfig {
    /// `-v` → debug, `-vv` → trace, `-q` → errors only
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            Level::ERROR
        } else {
            match verbose {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };
        LogConfig {
            level,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Default directive: our crate at the configured level, everything else at warn
pub fn default_directive(level: Level) -> String {
    format!("warn,property_migration={}", level.as_str().to_lowercase())
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(
    config: &LogConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_ansi(config.with_ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(config.with_ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(LogConfig::from_flags(0, false).level, Level::INFO);
        assert_eq!(LogConfig::from_flags(1, false).level, Level::DEBUG);
        assert_eq!(LogConfig::from_flags(3, false).level, Level::TRACE);
        assert_eq!(LogConfig::from_flags(2, true).level, Level::ERROR);
    }

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(Level::INFO), "warn,property_migration=info");
    }
}
