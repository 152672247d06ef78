use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::{EngineError, TransportError};
use crate::transport::{TransportAdapter, TransportEvent, TransportHandle, TransportRequest};

use super::config::HttpTransportConfig;
use super::utf8::Utf8Accumulator;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Transport that POSTs the request as JSON and reports the response body as
/// cumulative progress snapshots followed by one terminal notification.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: HttpTransportConfig) -> Result<Self, EngineError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout);
        if let Some(user_agent) = config.user_agent.as_deref() {
            builder = builder.user_agent(user_agent);
        }
        let client = builder
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Creates a transport using [`HttpTransportConfig::from_env`].
    pub fn from_env() -> Result<Self, EngineError> {
        Self::new(HttpTransportConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl TransportAdapter for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(&self, request: TransportRequest) -> Result<TransportHandle, TransportError> {
        if request.endpoint.trim().is_empty() {
            return Err(TransportError::config("endpoint must not be empty"));
        }

        let mut http_req = self
            .client
            .post(&request.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.body);
        for (name, value) in &request.headers {
            http_req = http_req.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req.send().await.map_err(|e| {
            TransportError::request(format!("request to {} failed: {e}", request.endpoint))
        })?;
        let status = response.status().as_u16();
        debug!(endpoint = %request.endpoint, status, "response headers received");

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(TransportHandle::new(Box::pin(body_events(
            status,
            bytes_stream,
        ))))
    }
}

fn body_events(
    status: u16,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = TransportEvent> + Send {
    struct State {
        status: u16,
        bytes_stream: ByteStream,
        body: Utf8Accumulator,
        done: bool,
    }

    stream::unfold(
        State {
            status,
            bytes_stream,
            body: Utf8Accumulator::default(),
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        if state.body.push(&chunk) {
                            let cumulative = state.body.as_str().to_owned();
                            return Some((TransportEvent::Progress { cumulative }, state));
                        }
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        let reason = format!("reading response body failed: {e}");
                        return Some((TransportEvent::Error { reason }, state));
                    }
                    None => {
                        state.done = true;
                        let event = TransportEvent::Terminal {
                            status: state.status,
                            body: state.body.finish(),
                        };
                        return Some((event, state));
                    }
                }
            }
        },
    )
}
