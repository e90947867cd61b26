//! Solace Common - Shared configuration, errors, and logging for the Solace chat relay.
//!
//! This crate provides:
//! - Configuration types, loading, and environment overrides
//! - Configuration validation
//! - The shared startup error type
//! - Logging setup with noise filtering
//! - Small string helpers for safe log output

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, KeySource, ObservabilityConfig, RateLimitSettings, RetrySettings, ServerConfig,
    SessionSettings, UpstreamConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

