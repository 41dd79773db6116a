//! Client configuration.

use std::time::Duration;

use bizdesk_events::DEFAULT_CAPACITY;
use thiserror::Error;

use crate::poller::{MAX_POLL_INTERVAL, MIN_POLL_INTERVAL};
use crate::reconnect::ReconnectPolicy;

pub const ENV_API_URL: &str = "BIZDESK_API_URL";
pub const ENV_API_TOKEN: &str = "BIZDESK_API_TOKEN";
pub const ENV_BUFFER_CAPACITY: &str = "BIZDESK_EVENT_BUFFER_CAPACITY";
pub const ENV_POLL_INTERVAL_MS: &str = "BIZDESK_POLL_INTERVAL_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "BIZDESK_REQUEST_TIMEOUT_MS";

/// Largest recent-events window a client may keep.
pub const MAX_BUFFER_CAPACITY: usize = 100_000;
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Backend paths, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub stream: String,
    pub recent: String,
    pub publish: String,
    pub stats: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            stream: "/api/events/stream/".to_string(),
            recent: "/api/events/recent/".to_string(),
            publish: "/api/events/publish/".to_string(),
            stats: "/api/events/stats/".to_string(),
        }
    }
}

/// Everything the real-time layer needs to talk to the backend.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub api_url: String,
    /// Bearer credential sent with every request (stream included).
    pub token: Option<String>,
    pub buffer_capacity: usize,
    /// Cadence used by `RealtimeHub::start_fallback_polling`.
    pub poll_interval: Duration,
    /// Applies to poll, publish and stats requests, and to opening the stream.
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub endpoints: Endpoints,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl RealtimeConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: None,
            buffer_capacity: DEFAULT_CAPACITY,
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::Manual,
            endpoints: Endpoints::default(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Load from `BIZDESK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, settings file, tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup(ENV_API_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_API_URL))?;

        let mut config = Self::new(api_url.trim());
        config.token = lookup(ENV_API_TOKEN).filter(|v| !v.trim().is_empty());

        if let Some(raw) = lookup(ENV_BUFFER_CAPACITY) {
            let capacity = parse_number(ENV_BUFFER_CAPACITY, &raw)?;
            config.buffer_capacity = usize::try_from(capacity).unwrap_or(usize::MAX);
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = Duration::from_millis(parse_number(ENV_POLL_INTERVAL_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout =
                Duration::from_millis(parse_number(ENV_REQUEST_TIMEOUT_MS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: ENV_API_URL,
                reason: format!("`{}` is not an http(s) URL", self.api_url),
            });
        }
        if !(1..=MAX_BUFFER_CAPACITY).contains(&self.buffer_capacity) {
            return Err(ConfigError::Invalid {
                key: ENV_BUFFER_CAPACITY,
                reason: format!("must be between 1 and {MAX_BUFFER_CAPACITY}"),
            });
        }
        if !(MIN_POLL_INTERVAL..=MAX_POLL_INTERVAL).contains(&self.poll_interval) {
            return Err(ConfigError::Invalid {
                key: ENV_POLL_INTERVAL_MS,
                reason: format!(
                    "must be between {}ms and {}ms",
                    MIN_POLL_INTERVAL.as_millis(),
                    MAX_POLL_INTERVAL.as_millis()
                ),
            });
        }
        if self.request_timeout.is_zero() || self.request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::Invalid {
                key: ENV_REQUEST_TIMEOUT_MS,
                reason: format!(
                    "must be greater than zero and at most {}ms",
                    MAX_REQUEST_TIMEOUT.as_millis()
                ),
            });
        }
        Ok(())
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("`{raw}`: {e}"),
    })
}
