use bobbin_core::message::Message;

/// Events published on a session's outbound stream.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The child process is up; waiting for its init record.
    Started,
    /// The child negotiated a session id different from the one we held.
    SessionIdChanged {
        previous: Option<String>,
        current: String,
    },
    /// Resume replayed this many messages from the store.
    HistoricalMessagesLoaded { count: usize },
    /// A message flowed through the session — user input we sent, or any
    /// decoded stream record converted to the internal model.
    Message { message: Message },
    /// The child finished a turn; the session is ready for input again.
    /// Shells typically map this to the "ready" chime.
    TurnCompleted {
        subtype: String,
        num_turns: u32,
        duration_ms: u64,
        is_error: bool,
    },
    /// An interrupt control request went out on the wire.
    InterruptSent { request_id: String },
    /// The child acknowledged the interrupt.
    InterruptAcknowledged,
    /// The child has been stopped and the session is inactive.
    Stopped,
    Warning { message: String },
    Error { message: String },
}
