use std::sync::Arc;

use bobbin_core::entities::AgentDefinition;
use bobbin_core::message::Message;
use bobbin_core::types::ThreadId;

/// Events published on an engine's outbound stream.
///
/// Every persisted step surfaces here after its write lands; subscribers
/// (UI tabs, the supervisor, tests) replay the recent ring on attach.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Initialisation finished; history is loaded and repaired.
    Initialized,
    /// The current thread's message list changed.
    StateChanged { messages: Arc<Vec<Message>> },
    /// A single message was appended (user, assistant, tool results, or a
    /// synthetic orphan repair).
    MessageEmitted { message: Message },
    /// The conversation now uses a different agent definition.
    DefinitionSwitched { definition: AgentDefinition },
    /// An edit or delete forked the conversation onto a new thread.
    ThreadForked {
        new_thread_id: ThreadId,
        origin_thread_id: ThreadId,
    },
    /// The running loop was cancelled by an interrupt.
    Interrupted,
    /// The loop finished a turn.
    Completed,
    Warning { message: String },
    Error { message: String },
}
