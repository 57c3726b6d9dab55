//! Persistent entities: projects, agent definitions, conversations, threads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AgentDefinitionId, ConversationId, Initiator, ProjectId, ProviderTag, ThreadId,
};

/// A logical workspace — a directory the assistant operates in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub path: std::path::PathBuf,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(path: impl Into<std::path::PathBuf>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            path: path.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A role template. Immutable once saved — conversations reference it by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: AgentDefinitionId,
    pub name: String,
    /// Ordered system-prompt fragments, joined when the prompt is assembled.
    pub system_prompts: Vec<String>,
    pub provider: ProviderTag,
    /// Overrides the provider's default model when set.
    pub model: Option<String>,
    /// Allow-list of tool names. Empty means all tools are allowed.
    pub tools: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, provider: ProviderTag) -> Self {
        Self {
            id: AgentDefinitionId::new(),
            name: name.into(),
            system_prompts: Vec::new(),
            provider,
            model: None,
            tools: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_system_prompt(mut self, fragment: impl Into<String>) -> Self {
        self.system_prompts.push(fragment.into());
        self
    }

    /// Join the prompt fragments into the system prompt sent to a provider.
    pub fn assembled_system_prompt(&self) -> String {
        self.system_prompts.join("\n\n")
    }

    /// Whether `tool_name` passes this definition's allow-list.
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool_name)
    }
}

/// The long-lived chat unit. Always points at exactly one current thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub project_id: ProjectId,
    pub agent_definition_id: AgentDefinitionId,
    pub initiator: Initiator,
    pub current_thread_id: ThreadId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        project_id: ProjectId,
        agent_definition_id: AgentDefinitionId,
        initiator: Initiator,
        current_thread_id: ThreadId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            project_id,
            agent_definition_id,
            initiator,
            current_thread_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An ordered view over a subset of a conversation's messages.
///
/// Threads never share positions: membership is thread-local, and a message
/// may belong to any number of threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub conversation_id: ConversationId,
    /// The thread this one was forked from, if any.
    pub originated_from_thread: Option<ThreadId>,
    /// Turn index in the origin thread where the fork happened.
    pub forked_at_turn: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn root(conversation_id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id: ThreadId::new(),
            conversation_id,
            originated_from_thread: None,
            forked_at_turn: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn forked(conversation_id: ConversationId, origin: ThreadId, forked_at_turn: u32) -> Self {
        let now = Utc::now();
        Self {
            id: ThreadId::new(),
            conversation_id,
            originated_from_thread: Some(origin),
            forked_at_turn: Some(forked_at_turn),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tool_list_allows_everything() {
        let def = AgentDefinition::new("coder", ProviderTag::Anthropic);
        assert!(def.allows_tool("read_file"));

        let mut restricted = def.clone();
        restricted.tools = vec!["read_file".to_string()];
        assert!(restricted.allows_tool("read_file"));
        assert!(!restricted.allows_tool("run_shell"));
    }

    #[test]
    fn assembled_prompt_joins_fragments() {
        let def = AgentDefinition::new("coder", ProviderTag::Anthropic)
            .with_system_prompt("You are a coder.")
            .with_system_prompt("Be terse.");
        assert_eq!(
            def.assembled_system_prompt(),
            "You are a coder.\n\nBe terse."
        );
    }

    #[test]
    fn forked_thread_records_origin() {
        let conversation = ConversationId::new();
        let root = Thread::root(conversation.clone());
        let fork = Thread::forked(conversation, root.id.clone(), 3);
        assert_eq!(fork.originated_from_thread, Some(root.id));
        assert_eq!(fork.forked_at_turn, Some(3));
    }
}
