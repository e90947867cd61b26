//! Fixed-window request limiting keyed by client identity.
//!
//! Each client key owns a window `{ count, window_start }`. On every check the
//! window is reset when `now - window_start > window`, the count is
//! incremented, and the request is allowed while `count <= max_requests`.
//! Denied checks still increment the count; the decision for a given state is
//! deterministic either way.
//!
//! Stale windows are dropped lazily on the next check for the same key and by
//! [`RateLimiter::sweep`]. Between sweeps the map grows with the number of
//! distinct keys seen; this is an accepted limitation for a single-process
//! relay.

use crate::clock::{system_clock, SharedClock};
use axum::http::HeaderMap;
use solace_common::config::{KeySource, RateLimitSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Limiter parameters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 15,
            window: Duration::from_secs(60),
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            max_requests: settings.max_requests,
            window: settings.window(),
        }
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow(RateLimitStatus),
    Deny(RateLimitStatus),
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    pub fn status(&self) -> RateLimitStatus {
        match self {
            Self::Allow(status) | Self::Deny(status) => *status,
        }
    }
}

/// Window state reported alongside a decision, in the shape of the
/// `RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    window_start: Instant,
}

/// Fixed-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<String, RateLimitWindow>>>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Count a request for `client_key` and decide whether it may proceed.
    pub fn check(&self, client_key: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let window = windows
            .entry(client_key.to_string())
            .or_insert(RateLimitWindow {
                count: 0,
                window_start: now,
            });

        if now.duration_since(window.window_start) > self.config.window {
            window.count = 0;
            window.window_start = now;
        }

        window.count = window.count.saturating_add(1);

        let elapsed = now.duration_since(window.window_start);
        let status = RateLimitStatus {
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(window.count),
            reset_after: self.config.window.saturating_sub(elapsed),
        };

        if window.count <= self.config.max_requests {
            RateLimitDecision::Allow(status)
        } else {
            tracing::debug!(
                client_key,
                count = window.count,
                limit = self.config.max_requests,
                "Rate limit exceeded"
            );
            RateLimitDecision::Deny(status)
        }
    }

    /// Drop windows that have fully elapsed. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.window_start) <= self.config.window);
        before - windows.len()
    }

    /// Number of tracked client keys.
    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

// ============================================================================
// Client key derivation
// ============================================================================

const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the rate-limit key for a request.
pub trait ClientKeyExtractor: Send + Sync {
    fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String;
}

/// Uses the first comma-separated value of a header, e.g. `X-Forwarded-For`,
/// falling back to the peer address.
#[derive(Debug, Clone)]
pub struct HeaderKeyExtractor {
    header: String,
}

impl HeaderKeyExtractor {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl ClientKeyExtractor for HeaderKeyExtractor {
    fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(|| PeerAddrKeyExtractor.client_key(headers, peer))
    }
}

/// Uses the connection's peer IP address.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddrKeyExtractor;

impl ClientKeyExtractor for PeerAddrKeyExtractor {
    fn client_key(&self, _headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        peer.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
    }
}

/// Build the extractor selected in configuration.
pub fn extractor_from_settings(settings: &RateLimitSettings) -> Arc<dyn ClientKeyExtractor> {
    match settings.key_source {
        KeySource::Header => Arc::new(HeaderKeyExtractor::new(settings.key_header.clone())),
        KeySource::Peer => Arc::new(PeerAddrKeyExtractor),
    }
}
