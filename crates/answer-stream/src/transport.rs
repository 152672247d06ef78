use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;

use crate::errors::TransportError;

/// Request handed to a transport adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportRequest {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
    /// Optional transport-level timeout for the whole request.
    pub timeout: Option<Duration>,
}

/// Notification delivered by a transport for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The whole body received so far.
    Progress { cumulative: String },
    /// Newly received text, for transports with true incremental delivery.
    Chunk { text: String },
    /// The request finished with `status`; `body` is the complete body.
    Terminal { status: u16, body: String },
    /// The request failed at the network level.
    Error { reason: String },
}

pub type TransportEventStream = Pin<Box<dyn futures::Stream<Item = TransportEvent> + Send + 'static>>;

type AbortHook = Box<dyn FnOnce() + Send + 'static>;

/// Open request returned by [`TransportAdapter::open`].
///
/// Dropping or aborting the handle drops the underlying event stream, so no
/// further notifications can be observed for the request.
pub struct TransportHandle {
    events: TransportEventStream,
    on_abort: Option<AbortHook>,
}

impl TransportHandle {
    pub fn new(events: TransportEventStream) -> Self {
        Self {
            events,
            on_abort: None,
        }
    }

    /// Registers a hook run by [`TransportHandle::abort`], for adapters that
    /// must signal cancellation beyond dropping the stream.
    pub fn with_abort_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_abort = Some(Box::new(hook));
        self
    }

    /// Waits for the next notification. `None` once the transport is exhausted.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.next().await
    }

    /// Aborts the request.
    pub fn abort(mut self) {
        if let Some(hook) = self.on_abort.take() {
            hook();
        }
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("has_abort_hook", &self.on_abort.is_some())
            .finish_non_exhaustive()
    }
}

/// Contract implemented by anything that can carry a request to the backend
/// and report its body back as notifications.
#[async_trait::async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Short name used in logs (for example `http`).
    fn name(&self) -> &str;

    /// Issues `request` and returns a handle yielding its notifications.
    async fn open(&self, request: TransportRequest) -> Result<TransportHandle, TransportError>;
}
