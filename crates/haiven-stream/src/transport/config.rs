use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::StreamError;

/// Configuration for `HttpTransport`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpTransportConfig {
    /// Base URL that relative request URLs (starting with `/`) are resolved
    /// against, for example `http://localhost:8080`.
    pub base_url: Option<String>,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Optional timeout for the whole response, stream included. Expiry
    /// surfaces as a connection error.
    pub request_timeout: Option<Duration>,
    /// Headers added to every request unless the request sets them itself.
    pub default_headers: BTreeMap<String, String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            default_headers: BTreeMap::new(),
        }
    }
}

impl HttpTransportConfig {
    /// Builds a config from environment variables.
    ///
    /// - `HAIVEN_BASE_URL`: base URL for relative request paths.
    /// - `HAIVEN_CONNECT_TIMEOUT_SECS`: connect timeout (default 10).
    /// - `HAIVEN_REQUEST_TIMEOUT_SECS`: overall response timeout (default none).
    pub fn from_env() -> Result<Self, StreamError> {
        let mut config = Self::default();
        if let Some(base_url) = env_value("HAIVEN_BASE_URL") {
            config.base_url = Some(base_url);
        }
        if let Some(secs) = env_secs("HAIVEN_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = secs;
        }
        config.request_timeout = env_secs("HAIVEN_REQUEST_TIMEOUT_SECS")?;
        Ok(config)
    }

    /// Sets the base URL for relative request paths.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Adds a header sent with every request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Resolves a request URL against the base URL.
    pub(crate) fn resolve_url(&self, url: &str) -> Result<reqwest::Url, StreamError> {
        match (&self.base_url, url.starts_with('/')) {
            (Some(base), true) => reqwest::Url::parse(base)
                .and_then(|base| base.join(url))
                .map_err(|e| StreamError::Config(format!("invalid base url {base:?}: {e}"))),
            (None, true) => Err(StreamError::Config(format!(
                "relative url {url:?} requires a base url"
            ))),
            (_, false) => reqwest::Url::parse(url)
                .map_err(|e| StreamError::Validation(format!("invalid url {url:?}: {e}"))),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_secs(key: &str) -> Result<Option<Duration>, StreamError> {
    env_value(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| StreamError::Config(format!("{key} must be whole seconds, got {raw:?}")))
        })
        .transpose()
}
