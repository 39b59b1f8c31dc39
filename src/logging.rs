//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set. Otherwise the filter is `repograde=info`
//! (`debug` with `--verbose`) with chatty HTTP crates held at `warn`.
//! `REPOGRADE_LOG_JSON=true` switches to JSON lines. Output goes to stderr
//! so command output on stdout stays machine-readable.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: Level,
    pub use_json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
        }
    }
}

impl LoggingConfig {
    /// Level from the `--verbose` flag, format from `REPOGRADE_LOG_JSON`.
    pub fn from_env(verbose: bool) -> Self {
        let use_json = std::env::var("REPOGRADE_LOG_JSON")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            level: if verbose { Level::DEBUG } else { Level::INFO },
            use_json,
        }
    }

    fn default_directives(&self) -> String {
        format!(
            "repograde={},tower_http=info,h2=warn,hyper=warn,reqwest=warn",
            self.level.as_str().to_lowercase()
        )
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

        let result = if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .try_init()
        };
        if let Err(e) = result {
            eprintln!("Failed to install tracing subscriber: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_follow_level() {
        let config = LoggingConfig::default();
        assert!(config.default_directives().starts_with("repograde=info"));

        let verbose = LoggingConfig {
            level: Level::DEBUG,
            use_json: false,
        };
        assert!(verbose.default_directives().starts_with("repograde=debug"));
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(LoggingConfig::default());
        init_logging(LoggingConfig::default());
    }
}
