use std::time::Duration;

/// Errors returned by a transport adapter before a notification stream is
/// established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (connection refused, DNS, TLS, etc.).
    #[error("request failed: {message}")]
    Request { message: String },
    /// The adapter or the request it was given is misconfigured.
    #[error("transport config error: {message}")]
    Config { message: String },
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Terminal failure of a stream session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum SessionFailure {
    /// Network or stream I/O failed.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// The backend answered with a non-success HTTP status.
    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },
    /// The backend reported an error inside the event stream.
    #[error("backend error: {message}")]
    Backend { message: String },
    /// No terminal notification arrived within the session timeout.
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl SessionFailure {
    pub(crate) fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The reason handed to `Subscriber::on_error`.
    ///
    /// Backend-reported errors are passed through verbatim.
    pub fn reason(&self) -> String {
        match self {
            Self::Backend { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Top-level error type for the public engine API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Invalid engine or transport configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input to the builder or conversation API.
    #[error("validation error: {0}")]
    Validation(String),
    /// A session is already in flight for this conversation.
    #[error("an answer is already streaming for this conversation")]
    Busy,
    /// The session failed; `partial` holds the text reconstructed before the failure.
    #[error("{failure}")]
    Failed {
        failure: SessionFailure,
        partial: String,
    },
    /// The session was cancelled before a terminal result was returned.
    #[error("cancelled")]
    Cancelled,
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Partially reconstructed text, when the error carries any.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            Self::Failed { partial, .. } if !partial.is_empty() => Some(partial),
            _ => None,
        }
    }
}
