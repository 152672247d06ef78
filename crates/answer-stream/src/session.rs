//! Synchronous state machine for one streamed answer.
//!
//! A [`StreamSession`] owns every piece of buffering state for exactly one
//! request. Transport notifications are fed in order; each one runs to
//! completion and may invoke the [`Subscriber`] zero or more times. The
//! session performs no I/O and never blocks.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::SessionFailure;
use crate::frame::{FrameKind, classify};
use crate::line_buffer::LineBuffer;
use crate::offset::OffsetTracker;
use crate::payload::{Message, interpret};

/// Receives the reconstructed answer as it grows.
///
/// Exactly one of `on_complete`, `on_error` or `on_cancelled` is called per
/// session, after which no callback fires again.
pub trait Subscriber {
    /// Strictly-new, already unescaped text to append to the displayed answer.
    fn on_delta(&mut self, text: &str);
    /// Terminal failure.
    fn on_error(&mut self, reason: &str);
    /// Terminal success carrying the full answer.
    fn on_complete(&mut self, final_text: &str);
    /// Terminal cancellation. Not an error.
    fn on_cancelled(&mut self) {}
}

impl<S: Subscriber + ?Sized> Subscriber for &mut S {
    fn on_delta(&mut self, text: &str) {
        (**self).on_delta(text);
    }

    fn on_error(&mut self, reason: &str) {
        (**self).on_error(reason);
    }

    fn on_complete(&mut self, final_text: &str) {
        (**self).on_complete(final_text);
    }

    fn on_cancelled(&mut self) {
        (**self).on_cancelled();
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    Idle,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(String),
    /// `partial` is the text reconstructed before the failure; it is incomplete.
    Failed {
        failure: SessionFailure,
        partial: String,
    },
    Cancelled {
        partial: String,
    },
}

/// Reconstructs one answer from transport notifications.
pub struct StreamSession<S> {
    id: uuid::Uuid,
    state: SessionState,
    tracker: OffsetTracker,
    lines: LineBuffer,
    accumulated: String,
    first_token_delivered: bool,
    deltas: u64,
    sentinel_seen: bool,
    chunked: bool,
    failure: Option<SessionFailure>,
    subscriber: S,
}

impl<S: Subscriber> StreamSession<S> {
    pub fn new(subscriber: S) -> Self {
        Self::with_id(uuid::Uuid::new_v4(), subscriber)
    }

    pub fn with_id(id: uuid::Uuid, subscriber: S) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            tracker: OffsetTracker::new(),
            lines: LineBuffer::new(),
            accumulated: String::new(),
            first_token_delivered: false,
            deltas: 0,
            sentinel_seen: false,
            chunked: false,
            failure: None,
            subscriber,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The answer reconstructed so far.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    pub fn processed_offset(&self) -> usize {
        self.tracker.processed_offset()
    }

    pub fn line_remainder(&self) -> &str {
        self.lines.remainder()
    }

    /// Whether any content has reached the subscriber yet. The first delta
    /// replaces a placeholder; later ones append.
    pub fn first_token_delivered(&self) -> bool {
        self.first_token_delivered
    }

    /// Number of deltas delivered so far.
    pub fn delta_count(&self) -> u64 {
        self.deltas
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn subscriber_mut(&mut self) -> &mut S {
        &mut self.subscriber
    }

    pub fn into_subscriber(self) -> S {
        self.subscriber
    }

    /// Terminal outcome, once the session has left `InFlight`.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        match self.state {
            SessionState::Idle | SessionState::InFlight => None,
            SessionState::Completed => Some(SessionOutcome::Completed(self.accumulated.clone())),
            SessionState::Failed => Some(SessionOutcome::Failed {
                failure: self.failure.clone().unwrap_or(SessionFailure::Transport {
                    message: "unknown failure".into(),
                }),
                partial: self.accumulated.clone(),
            }),
            SessionState::Cancelled => Some(SessionOutcome::Cancelled {
                partial: self.accumulated.clone(),
            }),
        }
    }

    /// Marks the request as issued. Notifications are ignored until then.
    pub fn start(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::InFlight;
            info!(session_id = %self.id, "stream session started");
        }
    }

    /// Handles a progress notification carrying the whole body received so far.
    pub fn on_progress(&mut self, cumulative: &str) {
        if !self.accepts_input("progress") {
            return;
        }
        let slice = self.tracker.advance(cumulative);
        if slice.is_empty() {
            return;
        }
        let lines = self.lines.consume(slice);
        self.process_lines(lines);
    }

    /// Handles a chunk from a transport with true incremental delivery.
    ///
    /// Bypasses offset tracking. Once a chunk has been seen, the body of the
    /// terminal notification is not re-read.
    pub fn on_chunk(&mut self, chunk: &str) {
        if !self.accepts_input("chunk") {
            return;
        }
        self.chunked = true;
        let lines = self.lines.consume(chunk);
        self.process_lines(lines);
    }

    /// Handles the transport's terminal notification.
    ///
    /// For 2xx statuses any unseen tail of `body` is processed, the retained
    /// fragment is flushed as a final line, and the session completes. Other
    /// statuses fail the session, preferring a backend `error` frame found in
    /// the unseen tail over a generic status message.
    pub fn on_terminal(&mut self, status: u16, body: &str) {
        if self.state != SessionState::InFlight {
            debug!(session_id = %self.id, state = ?self.state, "ignoring terminal notification");
            return;
        }

        let mut tail_lines = Vec::new();
        if !self.sentinel_seen {
            if !self.chunked {
                let tail = self.tracker.advance(body);
                tail_lines = self.lines.consume(tail);
            }
            tail_lines.extend(self.lines.flush());
        }

        if (200..300).contains(&status) {
            self.process_lines(tail_lines);
            if self.state == SessionState::InFlight {
                self.complete();
            }
            return;
        }

        let backend_error = tail_lines.iter().find_map(|line| {
            let frame = classify(line);
            if frame.kind != FrameKind::Data {
                return None;
            }
            match interpret(frame.raw_payload) {
                Message::ErrorMessage(message) => Some(message),
                _ => None,
            }
        });
        let failure = match backend_error {
            Some(message) => SessionFailure::Backend { message },
            None => SessionFailure::Status {
                status,
                message: summarize_body(body),
            },
        };
        self.fail(failure);
    }

    /// Handles a network-level failure reported by the transport.
    pub fn on_transport_error(&mut self, reason: &str) {
        if self.state != SessionState::InFlight {
            debug!(session_id = %self.id, state = ?self.state, "ignoring transport error");
            return;
        }
        self.fail(SessionFailure::Transport {
            message: reason.to_string(),
        });
    }

    /// Fails the session because no terminal notification arrived in time.
    pub fn on_timeout(&mut self, after: Duration) {
        if self.state != SessionState::InFlight {
            return;
        }
        self.fail(SessionFailure::timeout(after));
    }

    /// Cancels the session. Every later notification is discarded silently.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Cancelled;
        info!(session_id = %self.id, delivered = self.deltas, "stream session cancelled");
        self.subscriber.on_cancelled();
    }

    fn accepts_input(&self, kind: &'static str) -> bool {
        if self.state != SessionState::InFlight {
            debug!(session_id = %self.id, state = ?self.state, kind, "ignoring notification");
            return false;
        }
        if self.sentinel_seen {
            debug!(session_id = %self.id, kind, "ignoring input after end-of-stream sentinel");
            return false;
        }
        true
    }

    fn process_lines(&mut self, lines: Vec<String>) {
        for line in lines {
            if !self.process_line(&line) {
                break;
            }
        }
    }

    /// Returns `false` once no further lines of this request should be read.
    fn process_line(&mut self, line: &str) -> bool {
        let frame = classify(line);
        match frame.kind {
            FrameKind::Ignorable => true,
            FrameKind::Terminal => {
                debug!(session_id = %self.id, "end-of-stream sentinel received");
                self.sentinel_seen = true;
                false
            }
            FrameKind::Data => match interpret(frame.raw_payload) {
                Message::IncrementalToken(token) => {
                    self.append_token(&token);
                    true
                }
                Message::CumulativeText(text) => {
                    self.apply_cumulative(text);
                    true
                }
                Message::ErrorMessage(message) => {
                    self.fail(SessionFailure::Backend { message });
                    false
                }
                Message::Unparseable => true,
            },
        }
    }

    fn append_token(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        self.accumulated.push_str(token);
        self.deliver(token);
    }

    fn apply_cumulative(&mut self, text: String) {
        if text.len() < self.accumulated.len() {
            debug!(
                session_id = %self.id,
                current = self.accumulated.len(),
                received = text.len(),
                "ignoring shorter cumulative text"
            );
            return;
        }
        let common = common_prefix_len(&self.accumulated, &text);
        if common < self.accumulated.len() {
            warn!(
                session_id = %self.id,
                delivered = self.accumulated.len(),
                common,
                "cumulative text revises delivered text"
            );
        }
        let delta = text[common..].to_owned();
        self.accumulated = text;
        if !delta.is_empty() {
            self.deliver(&delta);
        }
    }

    fn deliver(&mut self, delta: &str) {
        debug!(session_id = %self.id, seq = self.deltas, len = delta.len(), "delivering delta");
        self.subscriber.on_delta(delta);
        self.first_token_delivered = true;
        self.deltas = self.deltas.saturating_add(1);
    }

    fn complete(&mut self) {
        self.state = SessionState::Completed;
        info!(
            session_id = %self.id,
            deltas = self.deltas,
            chars = self.accumulated.chars().count(),
            "stream session completed"
        );
        self.subscriber.on_complete(&self.accumulated);
    }

    fn fail(&mut self, failure: SessionFailure) {
        self.state = SessionState::Failed;
        warn!(session_id = %self.id, error = %failure, "stream session failed");
        self.subscriber.on_error(&failure.reason());
        self.failure = Some(failure);
    }
}

/// Byte length of the longest shared prefix, always on a char boundary of both.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .map(|(c, _)| c.len_utf8())
        .sum()
}

fn summarize_body(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "request failed".to_string();
    }
    let mut summary: String = trimmed.chars().take(MAX_CHARS).collect();
    if trimmed.chars().nth(MAX_CHARS).is_some() {
        summary.push('…');
    }
    summary
}
