use std::time::Duration;

use crate::config::env_duration_secs;
use crate::errors::EngineError;

/// Configuration for the reqwest-backed transport.
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Overall timeout for one streamed request.
    pub timeout: Duration,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Optional `User-Agent` header.
    pub user_agent: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            user_agent: Some(concat!("answer-stream/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl HttpTransportConfig {
    /// Builds a config from defaults overridden by
    /// `ANSWER_STREAM_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();
        if let Some(timeout) = env_duration_secs("ANSWER_STREAM_HTTP_TIMEOUT_SECS")? {
            config.timeout = timeout;
        }
        Ok(config)
    }

    /// Overrides the overall request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the `User-Agent` header; `None` sends reqwest's default.
    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }
}
