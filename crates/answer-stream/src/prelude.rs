//! Common imports for typical usage.
pub use crate::{
    AbortHandle, AnswerStream, ChatTurn, Conversation, ConversationConfig, Engine, EngineConfig,
    EngineError, Role, SessionFailure, StreamEvent, SubmitPolicy, Subscriber,
};
