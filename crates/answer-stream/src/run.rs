use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{Instrument as _, debug, info_span};

use crate::errors::EngineError;
use crate::session::{SessionOutcome, SessionState, StreamSession, Subscriber};
use crate::stream::StreamEvent;
use crate::transport::{TransportAdapter, TransportEvent, TransportRequest};

/// Handle used to cancel a streaming answer and observe its lifecycle.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
    state: watch::Receiver<SessionState>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Becomes visible as a terminal `StreamEvent::Cancelled`. Deltas already
    /// buffered in the stream are not handed out afterwards.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Current lifecycle state of the session.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether the session reached a terminal state (or its task is gone).
    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_terminal() || self.state.has_changed().is_err()
    }

    /// Waits until the session reaches a terminal state.
    pub async fn finished(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }
}

/// Everything needed to run one session.
pub(crate) struct RunSpec {
    pub transport: Arc<dyn TransportAdapter>,
    pub request: TransportRequest,
    pub session_id: uuid::Uuid,
    pub conversation_id: uuid::Uuid,
    pub timeout: Option<Duration>,
    pub stream_buffer_capacity: usize,
}

/// Streaming handle for one answer.
///
/// Use `next_event()` to consume events as they arrive and `finish()` to
/// obtain the final result after the terminal event.
pub struct AnswerStream {
    session_id: uuid::Uuid,
    conversation_id: uuid::Uuid,
    rx: mpsc::Receiver<StreamEvent>,
    final_rx: oneshot::Receiver<Result<String, EngineError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl AnswerStream {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn conversation_id(&self) -> uuid::Uuid {
        self.conversation_id
    }

    /// Returns a handle that can cancel the answer.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Shorthand for `abort_handle().abort()`.
    pub fn cancel(&self) {
        self.abort_handle.abort();
    }

    /// Waits for and returns the next event. `None` after the channel closes.
    ///
    /// Once cancellation has been requested only a terminal event is
    /// returned; deltas still queued in the channel are dropped.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            let event = self.rx.recv().await?;
            if event.is_terminal() {
                self.saw_terminal = true;
                return Some(event);
            }
            if self.abort_handle.is_aborted() {
                continue;
            }
            return Some(event);
        }
    }

    /// Drains the stream (if needed) and returns the complete answer.
    ///
    /// Safe to call after consuming events manually with `next_event()`.
    pub async fn finish(mut self) -> Result<String, EngineError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::protocol_msg(format!(
                "session task ended without final result (session={})",
                self.session_id
            ))),
        }
    }

    /// Forwards every event to `subscriber` and returns the final result.
    pub async fn drive<S: Subscriber>(mut self, mut subscriber: S) -> Result<String, EngineError> {
        while let Some(event) = self.next_event().await {
            match &event {
                StreamEvent::Started { .. } => {}
                StreamEvent::Delta { text, .. } => subscriber.on_delta(text),
                StreamEvent::Completed { text, .. } => subscriber.on_complete(text),
                StreamEvent::Failed { failure, .. } => subscriber.on_error(&failure.reason()),
                StreamEvent::Cancelled { .. } => subscriber.on_cancelled(),
            }
            if event.is_terminal() {
                break;
            }
        }
        self.finish().await
    }
}

/// Spawns the session task and returns its streaming handle.
pub(crate) fn spawn_run(spec: RunSpec) -> AnswerStream {
    let (tx, rx) = mpsc::channel(spec.stream_buffer_capacity.max(1));
    let (final_tx, final_rx) = oneshot::channel();
    let (abort_tx, abort_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(SessionState::Idle);

    let session_id = spec.session_id;
    let conversation_id = spec.conversation_id;
    let span = info_span!("answer", %session_id, %conversation_id);
    tokio::spawn(run_task(spec, tx, final_tx, abort_rx, state_tx).instrument(span));

    AnswerStream {
        session_id,
        conversation_id,
        rx,
        final_rx,
        abort_handle: AbortHandle {
            tx: abort_tx,
            state: state_rx,
        },
        saw_terminal: false,
    }
}

/// Subscriber that queues deltas until the task can send them.
struct DeltaQueue {
    session_id: uuid::Uuid,
    seq: u64,
    pending: VecDeque<StreamEvent>,
}

impl Subscriber for DeltaQueue {
    fn on_delta(&mut self, text: &str) {
        self.pending.push_back(StreamEvent::Delta {
            session_id: self.session_id,
            seq: self.seq,
            text: text.to_string(),
        });
        self.seq = self.seq.saturating_add(1);
    }

    // Terminal events are built from the session outcome.
    fn on_error(&mut self, _reason: &str) {}

    fn on_complete(&mut self, _final_text: &str) {}
}

enum Flush {
    Sent,
    Aborted,
    ReceiverGone,
}

async fn run_task(
    spec: RunSpec,
    tx: mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<String, EngineError>>,
    mut abort_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<SessionState>,
) {
    let RunSpec {
        transport,
        request,
        session_id,
        conversation_id,
        timeout,
        ..
    } = spec;
    let queue = DeltaQueue {
        session_id,
        seq: 0,
        pending: VecDeque::new(),
    };
    let mut session = StreamSession::with_id(session_id, queue);

    if !send_event(
        &tx,
        StreamEvent::Started {
            session_id,
            conversation_id,
        },
    )
    .await
    {
        session.cancel();
        state_tx.send_replace(session.state());
        let _ = final_tx.send(Err(EngineError::protocol_msg(
            "answer stream receiver dropped before Started",
        )));
        return;
    }

    session.start();
    state_tx.send_replace(session.state());
    let deadline = timeout.map(|t| Instant::now() + t);
    debug!(%session_id, %conversation_id, transport = transport.name(), "opening transport");

    let opened = tokio::select! {
        biased;
        () = abort_requested(&mut abort_rx) => None,
        () = deadline_elapsed(deadline) => None,
        opened = transport.open(request) => Some(opened),
    };

    let mut force_cancel = false;
    let mut receiver_gone = false;
    let aborted = *abort_rx.borrow();
    match opened {
        None if aborted => session.cancel(),
        None => session.on_timeout(timeout.unwrap_or_default()),
        Some(Err(err)) => session.on_transport_error(&err.to_string()),
        Some(Ok(mut handle)) => {
            loop {
                let event = tokio::select! {
                    biased;
                    () = abort_requested(&mut abort_rx) => {
                        session.cancel();
                        break;
                    }
                    () = deadline_elapsed(deadline) => {
                        session.on_timeout(timeout.unwrap_or_default());
                        break;
                    }
                    event = handle.next_event() => event,
                };
                match event {
                    Some(TransportEvent::Progress { cumulative }) => session.on_progress(&cumulative),
                    Some(TransportEvent::Chunk { text }) => session.on_chunk(&text),
                    Some(TransportEvent::Terminal { status, body }) => {
                        session.on_terminal(status, &body)
                    }
                    Some(TransportEvent::Error { reason }) => session.on_transport_error(&reason),
                    None => session
                        .on_transport_error("transport ended without a terminal notification"),
                }
                match flush_deltas(&mut session, &tx, &mut abort_rx).await {
                    Flush::Sent => {}
                    Flush::Aborted => {
                        session.cancel();
                        force_cancel = true;
                        break;
                    }
                    Flush::ReceiverGone => {
                        session.cancel();
                        receiver_gone = true;
                        break;
                    }
                }
                if session.state().is_terminal() {
                    break;
                }
            }
            handle.abort();
        }
    }

    state_tx.send_replace(if force_cancel {
        SessionState::Cancelled
    } else {
        session.state()
    });
    if receiver_gone {
        let _ = final_tx.send(Err(EngineError::protocol_msg(
            "answer stream receiver dropped during output",
        )));
        return;
    }

    let outcome = if force_cancel {
        Some(SessionOutcome::Cancelled {
            partial: session.accumulated_text().to_string(),
        })
    } else {
        session.outcome()
    };
    let (event, result) = match outcome {
        Some(SessionOutcome::Completed(text)) => (
            StreamEvent::Completed {
                session_id,
                text: text.clone(),
            },
            Ok(text),
        ),
        Some(SessionOutcome::Failed { failure, partial }) => (
            StreamEvent::Failed {
                session_id,
                failure: failure.clone(),
                partial: partial.clone(),
            },
            Err(EngineError::Failed { failure, partial }),
        ),
        Some(SessionOutcome::Cancelled { partial }) => (
            StreamEvent::Cancelled {
                session_id,
                partial,
            },
            Err(EngineError::Cancelled),
        ),
        None => {
            let _ = final_tx.send(Err(EngineError::protocol_msg(format!(
                "session left the run loop in state {:?}",
                session.state()
            ))));
            return;
        }
    };

    // A reader that stopped consuming must not keep a cancelled task alive.
    let receiver_alive = tokio::select! {
        biased;
        sent = tx.send(event) => sent.is_ok(),
        () = abort_requested(&mut abort_rx) => {
            debug!(%session_id, "event channel full after cancellation; terminal event dropped");
            true
        }
    };
    let _ = final_tx.send(match result {
        Ok(_) if !receiver_alive => Err(EngineError::protocol_msg(
            "answer stream receiver dropped before completion",
        )),
        other => other,
    });
}

/// Sends queued deltas, stopping early if cancellation was requested,
/// including while waiting for room in a full channel.
async fn flush_deltas(
    session: &mut StreamSession<DeltaQueue>,
    tx: &mpsc::Sender<StreamEvent>,
    abort_rx: &mut watch::Receiver<bool>,
) -> Flush {
    while let Some(event) = session.subscriber_mut().pending.pop_front() {
        let aborted = *abort_rx.borrow();
        if aborted {
            session.subscriber_mut().pending.clear();
            return Flush::Aborted;
        }
        let sent = tokio::select! {
            biased;
            () = abort_requested(abort_rx) => {
                session.subscriber_mut().pending.clear();
                return Flush::Aborted;
            }
            sent = tx.send(event) => sent.is_ok(),
        };
        if !sent {
            return Flush::ReceiverGone;
        }
    }
    Flush::Sent
}

async fn abort_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        let requested = *rx.borrow_and_update();
        if requested {
            return;
        }
        if rx.changed().await.is_err() {
            // Every handle is gone; nobody can cancel any more.
            std::future::pending::<()>().await;
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SessionFailure, TransportError};
    use crate::transport::TransportHandle;
    use futures::channel::mpsc as fmpsc;
    use futures::stream;
    use std::sync::Mutex;

    enum Script {
        Events(Vec<TransportEvent>),
        Channel(Mutex<Option<fmpsc::UnboundedReceiver<TransportEvent>>>),
        Pending,
        OpenError(TransportError),
    }

    struct ScriptedTransport {
        script: Script,
    }

    #[async_trait::async_trait]
    impl TransportAdapter for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn open(&self, _req: TransportRequest) -> Result<TransportHandle, TransportError> {
            match &self.script {
                Script::Events(events) => {
                    Ok(TransportHandle::new(Box::pin(stream::iter(events.clone()))))
                }
                Script::Channel(rx) => {
                    let rx = rx.lock().expect("lock").take().expect("opened once");
                    Ok(TransportHandle::new(Box::pin(rx)))
                }
                Script::Pending => Ok(TransportHandle::new(Box::pin(stream::pending()))),
                Script::OpenError(err) => Err(err.clone()),
            }
        }
    }

    fn spawn_with(script: Script, timeout: Option<Duration>) -> AnswerStream {
        spawn_run(RunSpec {
            transport: Arc::new(ScriptedTransport { script }),
            request: TransportRequest {
                endpoint: "http://backend.test/chat".into(),
                headers: Vec::new(),
                body: serde_json::json!({}),
                timeout: None,
            },
            session_id: uuid::Uuid::new_v4(),
            conversation_id: uuid::Uuid::new_v4(),
            timeout,
            stream_buffer_capacity: 8,
        })
    }

    fn progress(cumulative: &str) -> TransportEvent {
        TransportEvent::Progress {
            cumulative: cumulative.into(),
        }
    }

    async fn collect(stream: &mut AnswerStream) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    fn delta_texts(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn progress_then_terminal_streams_deltas_and_completes() {
        let first = "data: {\"text\":\"Xin\"}\n";
        let second = format!("{first}data: {{\"text\":\" chào\"}}\ndata: [DONE]\n");
        let mut stream = spawn_with(
            Script::Events(vec![
                progress(first),
                progress(&second),
                TransportEvent::Terminal {
                    status: 200,
                    body: second.clone(),
                },
            ]),
            None,
        );

        let events = collect(&mut stream).await;
        assert!(matches!(events[0], StreamEvent::Started { .. }));
        assert_eq!(delta_texts(&events), vec!["Xin", " chào"]);
        let seqs: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![0, 1]);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Completed { text, .. }) if text == "Xin chào"
        ));
        assert_eq!(stream.finish().await, Ok("Xin chào".to_string()));
    }

    #[tokio::test]
    async fn backend_error_fails_with_partial_text() {
        let body = "data: {\"text\":\"Một\"}\ndata: {\"error\":\"server busy\"}\n";
        let stream = spawn_with(
            Script::Events(vec![
                progress(body),
                TransportEvent::Terminal {
                    status: 200,
                    body: body.into(),
                },
            ]),
            None,
        );
        let err = stream.finish().await.expect_err("backend error");
        assert_eq!(
            err,
            EngineError::Failed {
                failure: SessionFailure::Backend {
                    message: "server busy".into()
                },
                partial: "Một".into(),
            }
        );
    }

    #[tokio::test]
    async fn open_error_becomes_transport_failure() {
        let mut stream = spawn_with(
            Script::OpenError(TransportError::request("connection refused")),
            None,
        );
        let events = collect(&mut stream).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Failed {
                failure: SessionFailure::Transport { .. },
                ..
            })
        ));
        assert!(matches!(
            stream.finish().await,
            Err(EngineError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn transport_ending_without_terminal_fails() {
        let stream = spawn_with(
            Script::Events(vec![progress("data: {\"text\":\"cut\"}\n")]),
            None,
        );
        let err = stream.finish().await.expect_err("no terminal");
        assert_eq!(err.partial_text(), Some("cut"));
    }

    #[tokio::test]
    async fn timeout_fails_pending_session() {
        let mut stream = spawn_with(Script::Pending, Some(Duration::from_millis(50)));
        let events = collect(&mut stream).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Failed {
                failure: SessionFailure::Timeout { after_ms: 50 },
                ..
            })
        ));
        assert!(stream.abort_handle().is_finished());
    }

    #[tokio::test]
    async fn cancellation_is_terminal_and_silences_late_notifications() {
        let (feed, rx) = fmpsc::unbounded();
        let mut stream = spawn_with(Script::Channel(Mutex::new(Some(rx))), None);

        assert!(matches!(
            stream.next_event().await,
            Some(StreamEvent::Started { .. })
        ));
        let first = "data: {\"text\":\"partial\"}\n";
        feed.unbounded_send(progress(first)).expect("feed");
        assert!(matches!(
            stream.next_event().await,
            Some(StreamEvent::Delta { text, .. }) if text == "partial"
        ));

        stream.cancel();
        let _ = feed.unbounded_send(progress(&format!("{first}data: {{\"text\":\" late\"}}\n")));
        let _ = feed.unbounded_send(TransportEvent::Terminal {
            status: 200,
            body: first.into(),
        });

        let rest = collect(&mut stream).await;
        assert_eq!(
            rest,
            vec![StreamEvent::Cancelled {
                session_id: stream.session_id(),
                partial: "partial".into(),
            }]
        );
        assert_eq!(stream.next_event().await, None);
        stream.abort_handle().finished().await;
        assert_eq!(stream.abort_handle().state(), SessionState::Cancelled);
        assert_eq!(stream.finish().await, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn drive_maps_events_onto_subscriber() {
        #[derive(Default)]
        struct Collect {
            text: String,
            completed: Option<String>,
            errors: usize,
        }

        impl Subscriber for Collect {
            fn on_delta(&mut self, text: &str) {
                self.text.push_str(text);
            }

            fn on_error(&mut self, _reason: &str) {
                self.errors += 1;
            }

            fn on_complete(&mut self, final_text: &str) {
                self.completed = Some(final_text.to_string());
            }
        }

        let body = "data: {\"full_text\":\"Câu trả lời\"}\ndata: [DONE]\n";
        let stream = spawn_with(
            Script::Events(vec![TransportEvent::Terminal {
                status: 200,
                body: body.into(),
            }]),
            None,
        );
        let mut collected = Collect::default();
        let result = stream.drive(&mut collected).await;
        assert_eq!(result, Ok("Câu trả lời".to_string()));
        assert_eq!(collected.text, "Câu trả lời");
        assert_eq!(collected.completed.as_deref(), Some("Câu trả lời"));
        assert_eq!(collected.errors, 0);
    }

    #[tokio::test]
    async fn deltas_queued_before_cancel_are_not_delivered() {
        #[derive(Default)]
        struct Record {
            deltas: Vec<String>,
            cancelled: usize,
        }

        impl Subscriber for Record {
            fn on_delta(&mut self, text: &str) {
                self.deltas.push(text.to_string());
            }

            fn on_error(&mut self, _reason: &str) {}

            fn on_complete(&mut self, _final_text: &str) {}

            fn on_cancelled(&mut self) {
                self.cancelled += 1;
            }
        }

        let (feed, rx) = fmpsc::unbounded();
        let mut stream = spawn_with(Script::Channel(Mutex::new(Some(rx))), None);
        assert!(matches!(
            stream.next_event().await,
            Some(StreamEvent::Started { .. })
        ));

        let mut body = String::new();
        for token in ["a", "b", "c"] {
            body.push_str(&format!("data: {{\"text\":\"{token}\"}}\n"));
            feed.unbounded_send(progress(&body)).expect("feed");
        }
        // The task forwards all three deltas into the channel before the cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.cancel();

        let mut record = Record::default();
        let result = stream.drive(&mut record).await;
        assert!(record.deltas.is_empty(), "delivered after cancel: {:?}", record.deltas);
        assert_eq!(record.cancelled, 1);
        assert_eq!(result, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_unblocks_a_task_waiting_on_a_full_channel() {
        let (feed, rx) = fmpsc::unbounded();
        let mut stream = spawn_run(RunSpec {
            transport: Arc::new(ScriptedTransport {
                script: Script::Channel(Mutex::new(Some(rx))),
            }),
            request: TransportRequest {
                endpoint: "http://backend.test/chat".into(),
                headers: Vec::new(),
                body: serde_json::json!({}),
                timeout: None,
            },
            session_id: uuid::Uuid::new_v4(),
            conversation_id: uuid::Uuid::new_v4(),
            timeout: None,
            stream_buffer_capacity: 1,
        });
        assert!(matches!(
            stream.next_event().await,
            Some(StreamEvent::Started { .. })
        ));

        let mut body = String::new();
        for _ in 0..5 {
            body.push_str("data: {\"text\":\"x\"}\n");
            feed.unbounded_send(progress(&body)).expect("feed");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = stream.abort_handle();
        handle.abort();
        tokio::time::timeout(Duration::from_secs(2), handle.finished())
            .await
            .expect("task reached a terminal state without a reader");
        assert_eq!(handle.state(), SessionState::Cancelled);
        assert_eq!(stream.finish().await, Err(EngineError::Cancelled));
    }
}
