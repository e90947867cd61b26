//! Configuration validation.
//!
//! Every section is checked and all failures are reported together, so a
//! broken config file can be fixed in one pass. A missing API key is not a
//! validation failure: the relay starts anyway and answers chat requests with
//! 503 until a key is provided.

use thiserror::Error;

use crate::config::{
    Config, ObservabilityConfig, RateLimitSettings, RetrySettings, ServerConfig, SessionSettings,
    UpstreamConfig,
};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["json", "pretty"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port} for {field}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{} configuration errors: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// A configuration section that can check its own values.
pub trait Validate {
    fn validate(&self) -> ValidationResult<()>;
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

fn non_zero(field: &str, value: u64) -> ValidationResult<()> {
    if value == 0 {
        Err(invalid(field, "must be greater than 0"))
    } else {
        Ok(())
    }
}

fn non_blank(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField {
            field: field.into(),
        })
    } else {
        Ok(())
    }
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> ValidationResult<()> {
    if allowed.contains(&value.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ))
    }
}

impl Config {
    /// Validate every section, collecting all failures.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.server,
            &self.upstream,
            &self.retry,
            &self.rate_limit,
            &self.session,
            &self.observability,
        ];

        let mut errors: Vec<ValidationError> = sections
            .iter()
            .filter_map(|section| section.validate().err())
            .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }
        non_blank("server.host", &self.host)
    }
}

impl Validate for UpstreamConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(invalid(
                "upstream.base_url",
                "must start with http:// or https://",
            ));
        }
        non_blank("upstream.model", &self.model)?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(
                "upstream.temperature",
                "must be between 0.0 and 2.0",
            ));
        }
        non_zero("upstream.max_tokens", u64::from(self.max_tokens))?;
        non_zero("upstream.timeout_secs", self.timeout_secs)
    }
}

impl Validate for RetrySettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.multiplier == 0 {
            return Err(invalid("retry.multiplier", "must be at least 1"));
        }
        Ok(())
    }
}

impl Validate for RateLimitSettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.enabled {
            non_zero("rate_limit.max_requests", u64::from(self.max_requests))?;
            non_zero("rate_limit.window_secs", self.window_secs)?;
        }
        non_blank("rate_limit.key_header", &self.key_header)
    }
}

impl Validate for SessionSettings {
    fn validate(&self) -> ValidationResult<()> {
        non_zero("session.ttl_secs", self.ttl_secs)?;
        non_zero("session.sweep_interval_secs", self.sweep_interval_secs)?;
        non_zero("session.max_message_chars", self.max_message_chars as u64)?;
        if self.max_turns.is_some_and(|n| n < 2) {
            return Err(invalid(
                "session.max_turns",
                "must be at least 2 (one exchange) or unset",
            ));
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        one_of("observability.log_level", &self.log_level, &LOG_LEVELS)?;
        one_of("observability.log_format", &self.log_format, &LOG_FORMATS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_log_level_checked_case_insensitively() {
        let mut config = Config::default();
        config.observability.log_level = "DEBUG".into();
        assert!(config.validate().is_ok());

        config.observability.log_level = "verbose".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "observability.log_level"
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_rate_limit_skips_budget_checks() {
        let mut config = Config::default();
        config.rate_limit.enabled = false;
        config.rate_limit.max_requests = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_turn_history_rejected() {
        let mut config = Config::default();
        config.session.max_turns = Some(1);
        assert!(config.validate().is_err());
        config.session.max_turns = Some(2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collects_errors_across_sections() {
        let mut config = Config::default();
        config.server.port = 0;
        config.session.ttl_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(&err, ValidationError::Multiple(errors) if errors.len() == 2));
        let message = err.to_string();
        assert!(message.contains("server.port"));
        assert!(message.contains("session.ttl_secs"));
    }

    #[test]
    fn test_base_url_needs_scheme() {
        let mut config = Config::default();
        config.upstream.base_url = "api.deepseek.com".into();
        assert!(config.validate().is_err());
    }
}
