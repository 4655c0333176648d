//! Session configuration, built in code or parsed from environment variables.

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_PING_DELAY_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Server resources that speak the state protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Operator state (`api/state`).
    State,
    /// Output display state (`api/display-state`).
    DisplayState,
}

impl Endpoint {
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::State => "api/state",
            Endpoint::DisplayState => "api/display-state",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Full websocket URL of the endpoint.
    pub url: String,
    /// Fixed pause between failed connection attempts.
    pub reconnect_delay: Duration,
    /// Pause between heartbeat pings; `None` disables the heartbeat.
    pub ping_delay: Option<Duration>,
    /// Deadline for each correlated request.
    pub request_timeout: Duration,
    /// Authenticate (and restore state after a server restart) on connect.
    pub auto_authenticate: bool,
}

impl SessionConfig {
    /// Config for an explicit websocket URL with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            ping_delay: Some(Duration::from_millis(DEFAULT_PING_DELAY_MS)),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            auto_authenticate: true,
        }
    }

    /// Config for `endpoint` on the server at `base_url` (`http(s)://host`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if the URL is not http or https.
    pub fn for_endpoint(base_url: &str, endpoint: Endpoint) -> Result<Self, ConfigError> {
        Ok(Self::new(ws_url(base_url, endpoint.path())?))
    }

    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `STREAMSYS_BASE_URL`: default `http://127.0.0.1:8080`
    /// - `STREAMSYS_RECONNECT_DELAY_MS`: default 1000
    /// - `STREAMSYS_PING_DELAY_MS`: default 1000; `off` or `none` disables
    /// - `STREAMSYS_REQUEST_TIMEOUT_MS`: default 10000
    /// - `STREAMSYS_AUTO_AUTH`: default `true`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] for a non-http(s) base URL.
    pub fn from_env(endpoint: Endpoint) -> Result<Self, ConfigError> {
        let base_url = std::env::var("STREAMSYS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let mut config = Self::for_endpoint(&base_url, endpoint)?;
        config.reconnect_delay =
            Duration::from_millis(env_parse("STREAMSYS_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS));
        config.ping_delay = parse_ping_delay(std::env::var("STREAMSYS_PING_DELAY_MS").ok().as_deref());
        config.request_timeout =
            Duration::from_millis(env_parse("STREAMSYS_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS));
        config.auto_authenticate = env_parse("STREAMSYS_AUTO_AUTH", true);
        Ok(config)
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_ping_delay(mut self, delay: Option<Duration>) -> Self {
        self.ping_delay = delay;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auto_authenticate(mut self, enabled: bool) -> Self {
        self.auto_authenticate = enabled;
        self
    }
}

/// Convert an `http(s)://host` base URL into the websocket URL for `path`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] if the scheme is not http or https.
pub fn ws_url(base_url: &str, path: &str) -> Result<String, ConfigError> {
    let trimmed = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');

    if let Some(rest) = trimmed.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/{path}"));
    }
    if let Some(rest) = trimmed.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/{path}"));
    }

    Err(ConfigError::InvalidBaseUrl(base_url.to_owned()))
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_ping_delay(raw: Option<&str>) -> Option<Duration> {
    let Some(raw) = raw.map(str::trim) else {
        return Some(Duration::from_millis(DEFAULT_PING_DELAY_MS));
    };
    if raw.eq_ignore_ascii_case("off") || raw.eq_ignore_ascii_case("none") {
        return None;
    }
    let ms = raw.parse::<u64>().unwrap_or(DEFAULT_PING_DELAY_MS);
    Some(Duration::from_millis(ms))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
