//! The store contract consumed by the engines.
//!
//! Writes are durable before the engine emits the corresponding event, and
//! readers observe append order (the thread-message position index). The
//! engines assume single-writer semantics per conversation — the supervisor
//! guarantees at most one live engine per conversation id.

use bobbin_core::entities::{AgentDefinition, Conversation, Project, Thread};
use bobbin_core::message::Message;
use bobbin_core::types::{AgentDefinitionId, ConversationId, MessageId, ProjectId, ThreadId};

use crate::error::Result;

/// Read/write surface over the conversation log.
///
/// Messages are append-only: `save_message` never overwrites, and nothing
/// deletes. Edits and deletes are expressed as new threads referencing a
/// subset of the existing messages.
pub trait ConversationStore: Send + Sync {
    fn save_project(&self, project: &Project) -> Result<()>;
    fn find_project(&self, id: &ProjectId) -> Result<Option<Project>>;

    fn save_agent_definition(&self, definition: &AgentDefinition) -> Result<()>;
    fn find_agent_definition(&self, id: &AgentDefinitionId) -> Result<Option<AgentDefinition>>;

    fn save_conversation(&self, conversation: &Conversation) -> Result<()>;
    fn find_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// Repoint the conversation's current thread (used by edit/delete forks).
    fn update_current_thread(
        &self,
        conversation_id: &ConversationId,
        thread_id: &ThreadId,
    ) -> Result<()>;

    /// Swap the conversation's agent definition.
    fn update_agent_definition(
        &self,
        conversation_id: &ConversationId,
        definition_id: &AgentDefinitionId,
    ) -> Result<()>;

    fn save_thread(&self, thread: &Thread) -> Result<()>;
    fn find_thread(&self, id: &ThreadId) -> Result<Option<Thread>>;

    /// Append-only message write.
    fn save_message(&self, message: &Message) -> Result<()>;

    /// Record that `message_id` occupies `position` in `thread_id`.
    fn add_thread_message(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        position: u32,
    ) -> Result<()>;

    /// All messages of a thread, ordered by position. Returned messages are
    /// stamped `is_historical` — they came from the store, not a live turn.
    fn find_messages_in_thread(
        &self,
        conversation_id: &ConversationId,
        thread_id: &ThreadId,
    ) -> Result<Vec<Message>>;
}
