use std::time::Duration;

use crate::errors::StreamError;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4689/orchestrator";

/// Configuration for the HTTP stream client.
///
/// No total request timeout is applied: investigation streams may stay silent
/// for long stretches. Only connection setup is bounded.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL the `/api/...` endpoints are resolved against.
    pub base_url: String,
    /// Timeout for establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Creates a config for `base_url` with a 10 second connect timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Builds a config from `INVESTIGATION_API_BASE_URL`, falling back to the
    /// local orchestrator address.
    pub fn from_env() -> Result<Self, StreamError> {
        let base_url = std::env::var("INVESTIGATION_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let config = Self::new(base_url.trim());
        config.validate()?;
        Ok(config)
    }

    /// Overrides the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(StreamError::Config("base_url must not be empty".into()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(StreamError::Config(format!(
                "base_url must be an http(s) URL: {base}"
            )));
        }
        Ok(())
    }

    pub(crate) fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim().trim_end_matches('/'), path)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}
