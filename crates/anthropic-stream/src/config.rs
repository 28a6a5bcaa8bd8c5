use std::time::Duration;

use crate::errors::ClientError;

/// Default API version sent in the `anthropic-version` header.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Configuration for [`Client`](crate::client::Client).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API key sent as `x-api-key`.
    pub api_key: String,
    /// Base URL of the API.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    /// Value of the `anthropic-version` header.
    pub api_version: String,
    /// Connect timeout and idle timeout between body reads. It does not
    /// limit how long a live stream may run.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Creates a config with sensible defaults and a provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(600),
        }
    }

    /// Builds a config from `ANTHROPIC_API_KEY`, honouring an optional
    /// `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self, ClientError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(ClientError::Config(
                "missing ANTHROPIC_API_KEY for the messages client".into(),
            ));
        }
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config = config.base_url(base_url);
        }
        Ok(config)
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the API version header.
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Overrides the connect and idle-read timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::Config("api_key must not be empty".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        Ok(())
    }

    pub(crate) fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}
