//! Tracing setup for the relay.
//!
//! The relay's own crates log at the configured level. HTTP plumbing
//! (hyper, reqwest, rustls, ...) is held at `warn` so request handling stays
//! readable. `RUST_LOG`, when set, replaces the whole filter.

use crate::config::ObservabilityConfig;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Transport and runtime crates pinned to `warn`.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tower_http",
];

/// Output style for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    Json,
    /// Human-readable, colored.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parse a configured format name. Unknown names fall back to pretty.
    pub fn parse(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

fn filter_directives(level: &str) -> String {
    NOISY_MODULES
        .iter()
        .fold(level.trim().to_lowercase(), |mut acc, module| {
            acc.push(',');
            acc.push_str(module);
            acc.push_str("=warn");
            acc
        })
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(level)))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(log_level: &str, log_format: &str) {
    let format = LogFormat::parse(log_format);
    let registry = tracing_subscriber::registry().with(env_filter(log_level));

    let installed = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_target(true),
            )
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(
            log_level = %log_level,
            log_format = ?format,
            "Logging initialized"
        );
    }
}

/// Same as [`init_logging`], reading both settings from configuration.
pub fn init_from_config(observability: &ObservabilityConfig) {
    init_logging(&observability.log_level, &observability.log_format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
    }

    #[test]
    fn test_directives_pin_transport_crates() {
        let directives = filter_directives("DEBUG");
        assert!(directives.starts_with("debug,"));
        for module in NOISY_MODULES {
            assert!(directives.contains(&format!("{module}=warn")));
        }
    }
}
