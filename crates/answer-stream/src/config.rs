use std::str::FromStr;
use std::time::Duration;

use crate::errors::EngineError;

/// System turn sent first in every request when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's questions clearly and concisely, and say so when a question is outside what you can answer.";

/// What a conversation does when a message is submitted while an answer is
/// still streaming.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitPolicy {
    /// Refuse the new submission with `EngineError::Busy`.
    #[default]
    Reject,
    /// Cancel the streaming answer, wait for it to stop, then submit.
    CancelPrevious,
}

impl FromStr for SubmitPolicy {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "cancel_previous" | "cancel-previous" | "cancel" => Ok(Self::CancelPrevious),
            other => Err(EngineError::Config(format!("unknown submit policy: {other}"))),
        }
    }
}

/// Engine-wide settings shared by every conversation.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Question-answering endpoint receiving the streamed request.
    pub endpoint: String,
    /// Optional bearer token sent as `Authorization`.
    pub api_key: Option<String>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Fixed system turn establishing the assistant's persona and scope.
    pub system_prompt: String,
    /// Per-answer timeout; `None` waits for the transport indefinitely.
    pub timeout: Option<Duration>,
    /// Bounded event buffer between the session task and the consumer.
    pub stream_buffer_capacity: usize,
    pub submit_policy: SubmitPolicy,
}

impl EngineConfig {
    /// Creates a config for `endpoint` with defaults for everything else.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            headers: Vec::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout: Some(Duration::from_secs(90)),
            stream_buffer_capacity: 128,
            submit_policy: SubmitPolicy::default(),
        }
    }

    /// Builds a config from the environment.
    ///
    /// - `ANSWER_STREAM_ENDPOINT` (required)
    /// - `ANSWER_STREAM_API_KEY`
    /// - `ANSWER_STREAM_SYSTEM_PROMPT`
    /// - `ANSWER_STREAM_TIMEOUT_SECS` (`0` disables the timeout)
    /// - `ANSWER_STREAM_SUBMIT_POLICY` (`reject` or `cancel_previous`)
    pub fn from_env() -> Result<Self, EngineError> {
        let endpoint = env_non_empty("ANSWER_STREAM_ENDPOINT").ok_or_else(|| {
            EngineError::Config("missing ANSWER_STREAM_ENDPOINT for the answer backend".into())
        })?;
        let mut config = Self::new(endpoint);
        config.api_key = env_non_empty("ANSWER_STREAM_API_KEY");
        if let Some(prompt) = env_non_empty("ANSWER_STREAM_SYSTEM_PROMPT") {
            config.system_prompt = prompt;
        }
        if let Some(timeout) = env_duration_secs("ANSWER_STREAM_TIMEOUT_SECS")? {
            config.timeout = (!timeout.is_zero()).then_some(timeout);
        }
        if let Some(policy) = env_non_empty("ANSWER_STREAM_SUBMIT_POLICY") {
            config.submit_policy = policy.parse()?;
        }
        Ok(config)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn submit_policy(mut self, policy: SubmitPolicy) -> Self {
        self.submit_policy = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if self.endpoint.trim().is_empty() {
            return Err(EngineError::Config("endpoint must not be empty".into()));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(EngineError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(EngineError::Config(
                "timeout must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// Headers for one request, including the bearer token when configured.
    pub(crate) fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if let Some(api_key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            headers.push(("authorization".into(), format!("Bearer {api_key}")));
        }
        headers
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_duration_secs(key: &str) -> Result<Option<Duration>, EngineError> {
    env_non_empty(key)
        .map(|raw| parse_secs(key, &raw))
        .transpose()
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, EngineError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| EngineError::Config(format!("{key} must be a whole number of seconds, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::new("http://localhost:8000/chat");
        assert!(config.validate().is_ok());
        assert_eq!(config.stream_buffer_capacity, 128);
        assert_eq!(config.submit_policy, SubmitPolicy::Reject);
    }

    #[test]
    fn validation_rejects_bad_values() {
        for config in [
            EngineConfig::new(" "),
            EngineConfig::new("http://x").stream_buffer_capacity(0),
            EngineConfig::new("http://x").timeout(Some(Duration::ZERO)),
        ] {
            assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        }
    }

    #[test]
    fn bearer_token_is_appended_to_headers() {
        let headers = EngineConfig::new("http://x")
            .header("x-app", "assistant")
            .api_key("secret")
            .request_headers();
        assert_eq!(
            headers,
            vec![
                ("x-app".to_string(), "assistant".to_string()),
                ("authorization".to_string(), "Bearer secret".to_string()),
            ]
        );
    }

    #[test]
    fn submit_policy_parses_known_names() {
        assert_eq!("reject".parse::<SubmitPolicy>().ok(), Some(SubmitPolicy::Reject));
        assert_eq!(
            "Cancel_Previous".parse::<SubmitPolicy>().ok(),
            Some(SubmitPolicy::CancelPrevious)
        );
        assert!("queue".parse::<SubmitPolicy>().is_err());
    }

    #[test]
    fn seconds_must_be_numeric() {
        assert_eq!(parse_secs("K", " 15 ").ok(), Some(Duration::from_secs(15)));
        assert!(matches!(parse_secs("K", "soon"), Err(EngineError::Config(msg)) if msg.contains("K")));
    }
}
