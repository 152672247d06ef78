//! Reconstructs a streamed assistant answer from a transport that only
//! exposes cumulative snapshots of the response body.
//!
//! The backend writes one event per line as `data: <json>\n` and ends the
//! stream with `data: [DONE]`. The pipeline for one answer is
//! offset tracker → line buffer → frame decoder → payload interpreter →
//! subscriber, driven by a [`StreamSession`].
//!
//! # Streaming an answer
//!
//! ```no_run
//! use answer_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), EngineError> {
//! let engine = Engine::from_env()?;
//! let mut conversation = engine.conversation(ConversationConfig::named("demo"));
//!
//! let mut answer = conversation.submit("What is a line buffer?").await?;
//! while let Some(event) = answer.next_event().await {
//!     if let StreamEvent::Delta { text, .. } = event {
//!         print!("{text}");
//!     }
//! }
//! let text = answer.finish().await?;
//! conversation.record_answer(text);
//! # Ok(())
//! # }
//! ```
//!
//! # Driving a session by hand
//!
//! ```
//! use answer_stream::{StreamSession, Subscriber};
//!
//! #[derive(Default)]
//! struct Print(String);
//!
//! impl Subscriber for Print {
//!     fn on_delta(&mut self, text: &str) { self.0.push_str(text); }
//!     fn on_error(&mut self, _reason: &str) {}
//!     fn on_complete(&mut self, _final_text: &str) {}
//! }
//!
//! let mut session = StreamSession::new(Print::default());
//! session.start();
//! session.on_progress("data: {\"text\":\"Xin\"}\n");
//! session.on_terminal(200, "data: {\"text\":\"Xin\"}\ndata: {\"text\":\" chào\"}\n");
//! assert_eq!(session.subscriber().0, "Xin chào");
//! ```

/// Engine-wide configuration.
pub mod config;
/// Conversation history and single-flight submission.
pub mod conversation;
/// Engine entry point and builder.
pub mod engine;
/// Error types used across the crate.
pub mod errors;
/// Event-stream line classification.
pub mod frame;
/// reqwest-backed transport.
pub mod http;
/// Newline framing across arbitrary chunk boundaries.
pub mod line_buffer;
/// Process-wide tracing setup.
pub mod observability;
/// Cumulative-buffer diffing.
pub mod offset;
/// Payload decoding.
pub mod payload;
/// Common imports for typical usage.
pub mod prelude;
/// Async driver and streaming handle.
pub mod run;
/// Per-request state machine.
pub mod session;
/// Public stream events.
pub mod stream;
/// Transport adapter contract.
pub mod transport;

pub use config::{EngineConfig, SubmitPolicy};
pub use conversation::{ChatTurn, Conversation, ConversationConfig, Role};
pub use engine::{Engine, EngineBuilder};
pub use errors::{EngineError, SessionFailure, TransportError};
pub use frame::{Frame, FrameKind, classify};
pub use http::{HttpTransport, HttpTransportConfig};
pub use line_buffer::LineBuffer;
pub use offset::OffsetTracker;
pub use payload::{Message, interpret};
pub use run::{AbortHandle, AnswerStream};
pub use session::{SessionOutcome, SessionState, StreamSession, Subscriber};
pub use stream::StreamEvent;
pub use transport::{
    TransportAdapter, TransportEvent, TransportEventStream, TransportHandle, TransportRequest,
};
