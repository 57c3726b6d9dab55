pub mod config;
pub mod entities;
pub mod error;
pub mod events;
pub mod message;
pub mod types;

pub use entities::{AgentDefinition, Conversation, Project, Thread};
pub use error::CoreError;
pub use events::EventBus;
pub use message::{ContentItem, Message, ResultPart, StructuredText};
pub use types::{
    AgentDefinitionId, BlockState, ConversationId, Initiator, MessageId, ProjectId, ProviderTag,
    RequestId, Role, SystemLevel, ThreadId,
};
