use std::sync::Arc;

use tracing::info;

use crate::config::SubmitPolicy;
use crate::engine::EngineInner;
use crate::errors::EngineError;
use crate::run::{AbortHandle, AnswerStream, RunSpec, spawn_run};
use crate::transport::TransportRequest;

/// Speaker of one conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One `{role, content}` turn sent upstream.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Configuration used to create a `Conversation`.
#[derive(Clone, Debug)]
pub struct ConversationConfig {
    /// Human-readable name, used in logs.
    pub name: String,
    /// Overrides the engine's submit policy for this conversation.
    pub submit_policy: Option<SubmitPolicy>,
}

impl ConversationConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            submit_policy: None,
        }
    }

    pub fn submit_policy(mut self, policy: SubmitPolicy) -> Self {
        self.submit_policy = Some(policy);
        self
    }
}

/// An ordered exchange with the assistant.
///
/// At most one answer streams per conversation at a time. History is kept in
/// memory only.
pub struct Conversation {
    engine: Arc<EngineInner>,
    id: uuid::Uuid,
    name: String,
    policy: SubmitPolicy,
    turns: Vec<ChatTurn>,
    in_flight: Option<AbortHandle>,
}

impl Conversation {
    pub(crate) fn new(engine: Arc<EngineInner>, config: ConversationConfig) -> Self {
        let policy = config
            .submit_policy
            .unwrap_or(engine.config.submit_policy);
        Self {
            engine,
            id: uuid::Uuid::new_v4(),
            name: config.name,
            policy,
            turns: Vec::new(),
            in_flight: None,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// User and assistant turns so far, without the system turn.
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Whether an answer is currently streaming.
    pub fn is_streaming(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Turns sent upstream: the fixed system turn followed by the history.
    pub fn request_turns(&self) -> Vec<ChatTurn> {
        let mut turns = Vec::with_capacity(self.turns.len() + 1);
        turns.push(ChatTurn::new(
            Role::System,
            self.engine.config.system_prompt.clone(),
        ));
        turns.extend(self.turns.iter().cloned());
        turns
    }

    /// Submits a user message and starts streaming the answer.
    ///
    /// If an answer is still streaming, the conversation's `SubmitPolicy`
    /// decides between refusing with `EngineError::Busy` and cancelling the
    /// previous answer first.
    pub async fn submit(&mut self, text: impl Into<String>) -> Result<AnswerStream, EngineError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(EngineError::Validation("message must not be empty".into()));
        }

        if let Some(previous) = self.in_flight.as_ref().filter(|h| !h.is_finished()) {
            match self.policy {
                SubmitPolicy::Reject => return Err(EngineError::Busy),
                SubmitPolicy::CancelPrevious => {
                    info!(conversation_id = %self.id, "cancelling streaming answer for new message");
                    previous.abort();
                    previous.finished().await;
                }
            }
        }

        self.turns.push(ChatTurn::new(Role::User, text));
        let config = &self.engine.config;
        let request = TransportRequest {
            endpoint: config.endpoint.clone(),
            headers: config.request_headers(),
            body: build_request_body(&self.request_turns()),
            timeout: None,
        };
        let stream = spawn_run(RunSpec {
            transport: self.engine.transport.clone(),
            request,
            session_id: uuid::Uuid::new_v4(),
            conversation_id: self.id,
            timeout: config.timeout,
            stream_buffer_capacity: config.stream_buffer_capacity,
        });
        info!(
            conversation_id = %self.id,
            conversation = %self.name,
            session_id = %stream.session_id(),
            turns = self.turns.len(),
            "answer requested"
        );
        self.in_flight = Some(stream.abort_handle());
        Ok(stream)
    }

    /// Cancels the streaming answer, if any. Returns whether one was streaming.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Appends the assistant's answer to the history so the next request
    /// carries it.
    pub fn record_answer(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.turns.push(ChatTurn::new(Role::Assistant, text));
        }
    }
}

fn build_request_body(turns: &[ChatTurn]) -> serde_json::Value {
    serde_json::json!({
        "messages": turns,
        "stream": true,
    })
}
