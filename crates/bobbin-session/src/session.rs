//! The session actor.
//!
//! A single cooperative task drives one subprocess-backed conversation. The
//! select loop is strictly prioritised: the priority channel always wins,
//! then the subprocess stream, then queued user commands. Channels are
//! conditionally armed by lifecycle state — while a response is in flight
//! the user channel is left unarmed, so new commands queue in its buffer
//! and drain on the transition back to ready.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use bobbin_core::config::EVENT_RING_CAPACITY;
use bobbin_core::events::EventBus;
use bobbin_core::message::Message;
use bobbin_core::types::{ConversationId, RequestId};
use bobbin_store::ConversationStore;
use bobbin_wire::{message_from_record, ControlRequestRecord, StreamRecord, ToolNameIndex};

use crate::events::SessionEvent;
use crate::transport::{SessionTransport, SpawnOptions, StreamItem};

/// Commands on the ordinary (queueing) channel.
#[derive(Debug)]
pub enum SessionCommand {
    /// Spawn the subprocess. Legal only while inactive.
    Start { options: SpawnOptions },
    /// Send one user turn. Queues while a response is in flight.
    SendMessage { text: String },
    /// Stop the subprocess and return to inactive.
    Stop,
}

/// Commands on the priority channel — serviced before anything else.
#[derive(Debug)]
pub enum PriorityCommand {
    /// Write an interrupt control request to the child.
    Interrupt,
    /// Pull one queued `SendMessage` past the state gating. Rejected while
    /// a response is in flight.
    ForceSend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Inactive,
    Starting,
    WaitingForInit,
    Active,
    Stopping,
}

/// Cheap cloneable handle to a live session actor.
#[derive(Clone)]
pub struct SessionHandle {
    conversation_id: ConversationId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    priority: mpsc::UnboundedSender<PriorityCommand>,
    events: Arc<EventBus<SessionEvent>>,
}

impl SessionHandle {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn start(&self, options: SpawnOptions) -> bool {
        self.commands
            .send(SessionCommand::Start { options })
            .is_ok()
    }

    pub fn send_message(&self, text: impl Into<String>) -> bool {
        self.commands
            .send(SessionCommand::SendMessage { text: text.into() })
            .is_ok()
    }

    pub fn stop(&self) -> bool {
        self.commands.send(SessionCommand::Stop).is_ok()
    }

    pub fn interrupt(&self) -> bool {
        self.priority.send(PriorityCommand::Interrupt).is_ok()
    }

    pub fn force_send(&self) -> bool {
        self.priority.send(PriorityCommand::ForceSend).is_ok()
    }

    /// Replay snapshot plus live tail of the session's event stream.
    pub fn subscribe(&self) -> (Vec<SessionEvent>, broadcast::Receiver<SessionEvent>) {
        self.events.subscribe()
    }
}

/// Spawn a session actor for `conversation_id` over the given transport.
pub fn spawn_session(
    conversation_id: ConversationId,
    transport: Box<dyn SessionTransport>,
    store: Arc<dyn ConversationStore>,
) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (priority_tx, priority_rx) = mpsc::unbounded_channel();
    let events = Arc::new(EventBus::new(EVENT_RING_CAPACITY));

    let actor = SessionActor {
        conversation_id: conversation_id.clone(),
        transport,
        store,
        events: Arc::clone(&events),
        state: SessionState::Inactive,
        waiting_for_response: false,
        session_id: None,
        pending_interrupt: None,
        stashed: None,
        stream: None,
        index: ToolNameIndex::new(),
        commands: command_rx,
        priority: priority_rx,
    };
    tokio::spawn(actor.run());

    SessionHandle {
        conversation_id,
        commands: command_tx,
        priority: priority_tx,
        events,
    }
}

// ---------------------------------------------------------------------------
// Actor internals
// ---------------------------------------------------------------------------

enum Wake {
    Priority(Option<PriorityCommand>),
    Stream(Option<StreamItem>),
    User(Option<SessionCommand>),
}

struct SessionActor {
    conversation_id: ConversationId,
    transport: Box<dyn SessionTransport>,
    store: Arc<dyn ConversationStore>,
    events: Arc<EventBus<SessionEvent>>,

    state: SessionState,
    /// The `_isWaitingForResponse` flag: true between sending a user turn
    /// and the matching `result` (or an acknowledged interrupt).
    waiting_for_response: bool,
    /// Canonical session id negotiated via `system{init}`.
    session_id: Option<String>,
    pending_interrupt: Option<String>,
    /// Put-back slot for a non-message command that force-send dequeued.
    stashed: Option<SessionCommand>,
    stream: Option<mpsc::Receiver<StreamItem>>,
    index: ToolNameIndex,

    commands: mpsc::UnboundedReceiver<SessionCommand>,
    priority: mpsc::UnboundedReceiver<PriorityCommand>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let stream_armed = self.stream.is_some()
                && matches!(
                    self.state,
                    SessionState::WaitingForInit | SessionState::Active
                );
            let user_armed =
                !(self.state == SessionState::Active && self.waiting_for_response);

            let wake = tokio::select! {
                biased;
                command = self.priority.recv() => Wake::Priority(command),
                item = next_stream_item(&mut self.stream), if stream_armed => Wake::Stream(item),
                command = next_user_command(&mut self.stashed, &mut self.commands), if user_armed => Wake::User(command),
            };

            match wake {
                Wake::Priority(Some(command)) => self.handle_priority(command).await,
                Wake::Stream(item) => self.handle_stream_item(item).await,
                Wake::User(Some(command)) => self.handle_command(command).await,
                // A closed handle side ends the actor.
                Wake::Priority(None) | Wake::User(None) => break,
            }
        }

        if self.state != SessionState::Inactive {
            let _ = self.transport.stop().await;
        }
        debug!(conversation = %self.conversation_id, "session actor stopped");
    }

    // -- commands ----------------------------------------------------------

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { options } => self.handle_start(options).await,
            SessionCommand::SendMessage { text } => match self.state {
                SessionState::Active => self.do_send_message(text).await,
                // Tolerated before init only as the very first message; it
                // triggers the provider while the state stays WaitingForInit.
                SessionState::WaitingForInit if !self.waiting_for_response => {
                    self.do_send_message(text).await;
                }
                state => {
                    self.warn_event(format!("cannot send a message while {state:?}"));
                }
            },
            SessionCommand::Stop => self.handle_stop().await,
        }
    }

    async fn handle_start(&mut self, options: SpawnOptions) {
        if self.state != SessionState::Inactive {
            self.warn_event(format!("start ignored while {:?}", self.state));
            return;
        }
        self.state = SessionState::Starting;
        info!(conversation = %self.conversation_id, resume = ?options.resume_session_id, "starting session");

        if let Err(e) = self.transport.start(&options).await {
            self.fail_transport(e.to_string()).await;
            return;
        }
        self.stream = self.transport.take_stream();

        if let Some(resume_id) = &options.resume_session_id {
            self.session_id = Some(resume_id.clone());
            self.replay_history();
        }

        self.state = SessionState::WaitingForInit;
        self.events.publish(SessionEvent::Started);
    }

    /// Load the conversation's current thread from the store and replay it
    /// on the event stream. Replayed messages are historical — subscribers
    /// must not trigger sounds or speech for them.
    fn replay_history(&mut self) {
        let loaded = self
            .store
            .find_conversation(&self.conversation_id)
            .and_then(|conversation| match conversation {
                Some(c) => self
                    .store
                    .find_messages_in_thread(&self.conversation_id, &c.current_thread_id),
                None => Ok(Vec::new()),
            });

        match loaded {
            Ok(messages) => {
                let count = messages.len();
                for message in messages {
                    self.events.publish(SessionEvent::Message { message });
                }
                info!(count, "historical messages replayed");
                self.events
                    .publish(SessionEvent::HistoricalMessagesLoaded { count });
            }
            Err(e) => {
                self.warn_event(format!("failed to load history: {e}"));
            }
        }
    }

    async fn do_send_message(&mut self, text: String) {
        let session_id = self.session_id.clone().unwrap_or_default();

        // The user message goes onto the event stream first, then the wire;
        // the child does not echo driver input back.
        let message = Message::user(self.conversation_id.clone(), text.clone());
        self.events.publish(SessionEvent::Message { message });

        if let Err(e) = self.transport.send_user(&text, &session_id).await {
            self.fail_transport(e.to_string()).await;
            return;
        }
        self.waiting_for_response = true;
    }

    async fn handle_stop(&mut self) {
        if matches!(self.state, SessionState::Inactive | SessionState::Stopping) {
            self.warn_event(format!("stop ignored while {:?}", self.state));
            return;
        }
        self.state = SessionState::Stopping;
        if let Err(e) = self.transport.stop().await {
            self.warn_event(format!("error while stopping subprocess: {e}"));
        }
        self.cleanup();
        self.events.publish(SessionEvent::Stopped);
    }

    // -- priority ----------------------------------------------------------

    async fn handle_priority(&mut self, command: PriorityCommand) {
        match command {
            PriorityCommand::Interrupt => self.handle_interrupt().await,
            PriorityCommand::ForceSend => self.handle_force_send().await,
        }
    }

    async fn handle_interrupt(&mut self) {
        if !matches!(
            self.state,
            SessionState::Active | SessionState::WaitingForInit
        ) {
            self.warn_event(format!("interrupt ignored while {:?}", self.state));
            return;
        }
        if self.pending_interrupt.is_some() {
            debug!("interrupt already pending — ignored");
            return;
        }

        let request_id = RequestId::new();
        let request = ControlRequestRecord::interrupt(request_id.as_str());
        if let Err(e) = self.transport.send_control(&request).await {
            self.fail_transport(e.to_string()).await;
            return;
        }
        info!(request_id = %request_id, "interrupt sent");
        self.pending_interrupt = Some(request_id.as_str().to_string());
        self.events.publish(SessionEvent::InterruptSent {
            request_id: request_id.as_str().to_string(),
        });
    }

    /// The operator's escape hatch: pull one queued `SendMessage` past the
    /// state gating. Rejected while a response is in flight; a non-message
    /// command at the head of the queue is put back untouched.
    async fn handle_force_send(&mut self) {
        if self.state == SessionState::Active && self.waiting_for_response {
            self.warn_event("force send rejected while awaiting a response");
            return;
        }

        let next = match self.stashed.take() {
            Some(command) => Some(command),
            None => self.commands.try_recv().ok(),
        };
        match next {
            Some(SessionCommand::SendMessage { text }) => {
                info!("force-sending queued message");
                self.do_send_message(text).await;
            }
            Some(other) => {
                self.stashed = Some(other);
                self.warn_event("force send: next queued command is not a message");
            }
            None => {
                self.warn_event("force send: no queued command");
            }
        }
    }

    // -- stream ------------------------------------------------------------

    async fn handle_stream_item(&mut self, item: Option<StreamItem>) {
        match item {
            Some(StreamItem::Record { record, raw }) => self.handle_record(record, raw),
            Some(StreamItem::Malformed { error, raw }) => {
                // Codec errors never terminate the session on their own.
                warn!(error = %error, raw = %raw, "malformed wire record");
                self.events.publish(SessionEvent::Error {
                    message: format!("codec error: {error}"),
                });
            }
            Some(StreamItem::Exit) | None => {
                if self.state == SessionState::Stopping {
                    debug!("stream closed during stop");
                } else {
                    self.fail_transport("subprocess exited unexpectedly".to_string())
                        .await;
                }
                self.stream = None;
            }
        }
    }

    fn handle_record(&mut self, record: StreamRecord, raw: String) {
        debug!(kind = record.kind(), "stream record received");
        match &record {
            StreamRecord::System(system) if system.is_init() => {
                if let Some(current) = system.session_id.clone() {
                    if self.session_id.as_deref() != Some(current.as_str()) {
                        let previous = self.session_id.take();
                        info!(?previous, current = %current, "session id negotiated");
                        self.session_id = Some(current.clone());
                        self.events
                            .publish(SessionEvent::SessionIdChanged { previous, current });
                    }
                }
                if self.state == SessionState::WaitingForInit {
                    self.state = SessionState::Active;
                }
            }
            StreamRecord::Result(result) => {
                self.waiting_for_response = false;
                self.events.publish(SessionEvent::TurnCompleted {
                    subtype: result.subtype.clone(),
                    num_turns: result.num_turns,
                    duration_ms: result.duration_ms,
                    is_error: result.is_error,
                });
            }
            StreamRecord::ControlResponse(response) => {
                let body = &response.response;
                let matches_pending = self.pending_interrupt.as_deref() == Some(&body.request_id);
                match body.subtype.as_str() {
                    "success" if matches_pending => {
                        self.pending_interrupt = None;
                        self.waiting_for_response = false;
                        self.events.publish(SessionEvent::InterruptAcknowledged);
                    }
                    "error" => {
                        self.pending_interrupt = None;
                        self.events.publish(SessionEvent::Error {
                            message: body
                                .error
                                .clone()
                                .unwrap_or_else(|| "control request failed".to_string()),
                        });
                    }
                    other => {
                        debug!(subtype = %other, request_id = %body.request_id, "unmatched control response");
                    }
                }
            }
            // Only the driver is supposed to write these; the child sending
            // them is logged but never acted on.
            StreamRecord::User(_) => {
                warn!("child emitted a user record — converting without acting on it");
            }
            StreamRecord::ControlRequest(request) => {
                warn!(request_id = %request.request_id, "child emitted a control request — ignored");
            }
            StreamRecord::Assistant(_) | StreamRecord::System(_) | StreamRecord::Unknown(_) => {}
        }

        // Every decoded record also fans out as an internal message with the
        // raw line attached for debugging.
        if let Some(message) =
            message_from_record(&record, &self.conversation_id, &raw, &mut self.index)
        {
            self.events.publish(SessionEvent::Message { message });
        }
    }

    // -- failure and cleanup ----------------------------------------------

    /// Transport failures end the session: emit the error, stop the child,
    /// and return to inactive.
    async fn fail_transport(&mut self, message: String) {
        warn!(conversation = %self.conversation_id, "{message}");
        self.events.publish(SessionEvent::Error { message });
        let _ = self.transport.stop().await;
        self.cleanup();
    }

    fn cleanup(&mut self) {
        self.state = SessionState::Inactive;
        self.waiting_for_response = false;
        self.pending_interrupt = None;
        self.stream = None;
    }

    fn warn_event(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(conversation = %self.conversation_id, "{message}");
        self.events.publish(SessionEvent::Warning { message });
    }
}

async fn next_stream_item(stream: &mut Option<mpsc::Receiver<StreamItem>>) -> Option<StreamItem> {
    match stream {
        Some(rx) => rx.recv().await,
        // Unreachable: the branch is only armed when a stream exists.
        None => std::future::pending().await,
    }
}

async fn next_user_command(
    stashed: &mut Option<SessionCommand>,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
) -> Option<SessionCommand> {
    if let Some(command) = stashed.take() {
        return Some(command);
    }
    commands.recv().await
}
