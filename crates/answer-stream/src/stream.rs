use crate::errors::SessionFailure;

/// Events exposed by `AnswerStream`.
///
/// Every stream yields `Started`, zero or more `Delta`s, then exactly one of
/// `Completed`, `Failed` or `Cancelled`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Started {
        session_id: uuid::Uuid,
        conversation_id: uuid::Uuid,
    },
    /// Strictly-new answer text. `seq == 0` is the first content of the
    /// answer and replaces any placeholder.
    Delta {
        session_id: uuid::Uuid,
        seq: u64,
        text: String,
    },
    Completed {
        session_id: uuid::Uuid,
        text: String,
    },
    /// `partial` is the incomplete text reconstructed before the failure.
    Failed {
        session_id: uuid::Uuid,
        failure: SessionFailure,
        partial: String,
    },
    Cancelled {
        session_id: uuid::Uuid,
        partial: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}
