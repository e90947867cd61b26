//! Configuration management for Solace services.
//!
//! The relay reads an optional JSON configuration file at `~/.solace/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PORT` / `SOLACE_PORT` → server.port
//! - `SOLACE_HOST` → server.host
//! - `SOLACE_ALLOWED_ORIGINS` → server.allowed_origins (comma-separated)
//! - `SOLACE_ENV` / `NODE_ENV` → server.environment
//! - `SOLACE_STATIC_DIR` → server.static_dir
//! - `SOLACE_LOG_LEVEL` → observability.log_level
//! - `SOLACE_LOG_FORMAT` → observability.log_format
//! - `DEEPSEEK_API_KEY` → upstream.api_key
//! - `DEEPSEEK_BASE_URL` → upstream.base_url
//! - `DEEPSEEK_MODEL` → upstream.model

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the completion API credential.
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".solace"),
        |dirs| dirs.home_dir().join(".solace"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Server
// ============================================================================

/// HTTP listener and surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,

    /// Listening port. Default: 3000
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS. Empty or `["*"]` allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Deployment environment name (development, production, ...)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Directory with the single-page frontend, served with an `index.html` fallback.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
            environment: default_environment(),
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// Whether CORS should accept any origin.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

fn default_environment() -> String {
    "development".into()
}

// ============================================================================
// Upstream completion API
// ============================================================================

/// Chat-completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL; `/v1/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Cap on generated reply length.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Hard timeout for a single upstream attempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// API key. Usually provided through `DEEPSEEK_API_KEY` instead.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://api.deepseek.com".into()
}

fn default_model() -> String {
    "deepseek-chat".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    150
}

fn default_timeout_secs() -> u64 {
    10
}

// ============================================================================
// Retry
// ============================================================================

/// Backoff settings for upstream calls.
///
/// Delay before retry `k` is `base_delay_ms * multiplier^(k-1)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    300
}

fn default_multiplier() -> u32 {
    3
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Where the rate limiter takes the client identity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// A request header (e.g. `X-Forwarded-For`), falling back to the peer address.
    #[default]
    Header,
    /// The TCP peer address.
    Peer,
}

/// Fixed-window rate limiting for the chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests allowed per window and client key.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default)]
    pub key_source: KeySource,

    /// Header consulted when `key_source` is `header`.
    #[serde(default = "default_key_header")]
    pub key_header: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            key_source: KeySource::default(),
            key_header: default_key_header(),
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_max_requests() -> u32 {
    15
}

fn default_window_secs() -> u64 {
    60
}

fn default_key_header() -> String {
    "x-forwarded-for".into()
}

// ============================================================================
// Sessions
// ============================================================================

/// Conversation session lifetime and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Session lifetime; refreshed after every successful exchange.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum non-system turns kept per session. `None` keeps everything until expiry.
    #[serde(default)]
    pub max_turns: Option<usize>,

    /// How often expired sessions and stale rate-limit windows are swept.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Longest accepted user message, in characters.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_turns: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

impl SessionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_message_chars() -> usize {
    500
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure for the relay.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("SOLACE_PORT").or_else(|_| std::env::var("PORT")) {
            if let Ok(p) = port.trim().parse() {
                self.server.port = p;
            }
        }
        if let Ok(host) = std::env::var("SOLACE_HOST") {
            self.server.host = host;
        }
        if let Ok(origins) = std::env::var("SOLACE_ALLOWED_ORIGINS") {
            self.server.allowed_origins = parse_list(&origins);
        }
        if let Ok(env) = std::env::var("SOLACE_ENV").or_else(|_| std::env::var("NODE_ENV")) {
            self.server.environment = env;
        }
        if let Ok(dir) = std::env::var("SOLACE_STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(dir));
        }

        if let Ok(level) = std::env::var("SOLACE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("SOLACE_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.upstream.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("DEEPSEEK_BASE_URL") {
            self.upstream.base_url = url;
        }
        if let Ok(model) = std::env::var("DEEPSEEK_MODEL") {
            self.upstream.model = model;
        }
    }

    /// Whether an API key was present when the configuration was loaded.
    pub fn has_api_key(&self) -> bool {
        self.upstream
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_relay_contract() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.upstream.model, "deepseek-chat");
        assert!((config.upstream.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.upstream.max_tokens, 150);
        assert_eq!(config.upstream.timeout(), Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 300);
        assert_eq!(config.retry.multiplier, 3);
        assert_eq!(config.rate_limit.max_requests, 15);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.session.ttl(), Duration::from_secs(3600));
        assert_eq!(config.session.max_message_chars, 500);
        assert!(config.session.max_turns.is_none());
        assert!(!config.has_api_key());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "server": { "port": 8080 }, "rate_limit": { "key_source": "peer" } }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.rate_limit.key_source, KeySource::Peer);
        assert_eq!(config.rate_limit.max_requests, 15);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(" https://a.example, ,https://b.example "),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_any_origin() {
        let mut server = ServerConfig::default();
        assert!(server.allows_any_origin());
        server.allowed_origins = vec!["https://solace.example".into()];
        assert!(!server.allows_any_origin());
        server.allowed_origins.push("*".into());
        assert!(server.allows_any_origin());
    }
}
