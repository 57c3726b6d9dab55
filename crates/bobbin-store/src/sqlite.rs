//! SQLite implementation of the conversation store.
//!
//! Wraps a single connection in a `Mutex`. Engines serialise their own
//! writes per conversation, so a connection pool would buy nothing here.

use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};

use bobbin_core::entities::{AgentDefinition, Conversation, Project, Thread};
use bobbin_core::message::Message;
use bobbin_core::types::{
    AgentDefinitionId, ConversationId, Initiator, MessageId, ProjectId, ProviderTag, Role,
    ThreadId,
};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::ConversationStore;

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an already-open connection and ensure the schema exists.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    /// In-memory store for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }
}

impl ConversationStore for SqliteStore {
    #[instrument(skip(self, project), fields(id = %project.id))]
    fn save_project(&self, project: &Project) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO projects (id, path, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                project.id.as_str(),
                project.path.to_string_lossy().into_owned(),
                project.name,
                project.created_at.to_rfc3339(),
                project.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn find_project(&self, id: &ProjectId) -> Result<Option<Project>> {
        let db = self.db.lock().unwrap();
        optional(db.query_row(
            "SELECT id, path, name, created_at, updated_at FROM projects WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_project,
        ))
    }

    #[instrument(skip(self, definition), fields(id = %definition.id, name = %definition.name))]
    fn save_agent_definition(&self, definition: &AgentDefinition) -> Result<()> {
        let system_prompts = serde_json::to_string(&definition.system_prompts)?;
        let tools = serde_json::to_string(&definition.tools)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO agent_definitions
             (id, name, system_prompts, provider, model, tools, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                definition.id.as_str(),
                definition.name,
                system_prompts,
                definition.provider.to_string(),
                definition.model,
                tools,
                definition.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn find_agent_definition(&self, id: &AgentDefinitionId) -> Result<Option<AgentDefinition>> {
        let db = self.db.lock().unwrap();
        optional(db.query_row(
            "SELECT id, name, system_prompts, provider, model, tools, created_at
             FROM agent_definitions WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_definition,
        ))
    }

    #[instrument(skip(self, conversation), fields(id = %conversation.id))]
    fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let initiator = serde_json::to_string(&conversation.initiator)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO conversations
             (id, project_id, agent_definition_id, initiator, current_thread_id,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                conversation.id.as_str(),
                conversation.project_id.as_str(),
                conversation.agent_definition_id.as_str(),
                initiator,
                conversation.current_thread_id.as_str(),
                conversation.created_at.to_rfc3339(),
                conversation.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn find_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        optional(db.query_row(
            "SELECT id, project_id, agent_definition_id, initiator, current_thread_id,
                    created_at, updated_at
             FROM conversations WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_conversation,
        ))
    }

    #[instrument(skip(self), fields(conversation = %conversation_id, thread = %thread_id))]
    fn update_current_thread(
        &self,
        conversation_id: &ConversationId,
        thread_id: &ThreadId,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE conversations SET current_thread_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![thread_id.as_str(), now, conversation_id.as_str()],
        )?;
        if rows_changed == 0 {
            return Err(StoreError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(conversation = %conversation_id, definition = %definition_id))]
    fn update_agent_definition(
        &self,
        conversation_id: &ConversationId,
        definition_id: &AgentDefinitionId,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE conversations SET agent_definition_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![definition_id.as_str(), now, conversation_id.as_str()],
        )?;
        if rows_changed == 0 {
            return Err(StoreError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, thread), fields(id = %thread.id))]
    fn save_thread(&self, thread: &Thread) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO threads
             (id, conversation_id, originated_from_thread, forked_at_turn,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                thread.id.as_str(),
                thread.conversation_id.as_str(),
                thread.originated_from_thread.as_ref().map(|t| t.as_str()),
                thread.forked_at_turn,
                thread.created_at.to_rfc3339(),
                thread.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn find_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        let db = self.db.lock().unwrap();
        optional(db.query_row(
            "SELECT id, conversation_id, originated_from_thread, forked_at_turn,
                    created_at, updated_at
             FROM threads WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_thread,
        ))
    }

    #[instrument(skip(self, message), fields(id = %message.id, role = %message.role))]
    fn save_message(&self, message: &Message) -> Result<()> {
        let content = serde_json::to_string(&message.content)?;
        let provider_meta = message
            .provider_meta
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages
             (id, conversation_id, role, content, provider_meta, raw_wire, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                message.id.as_str(),
                message.conversation_id.as_str(),
                message.role.to_string(),
                content,
                provider_meta,
                message.raw_wire,
                message.created_at.to_rfc3339(),
            ],
        )?;
        debug!("message appended");
        Ok(())
    }

    fn add_thread_message(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        position: u32,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO thread_messages (thread_id, position, message_id)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![thread_id.as_str(), position, message_id.as_str()],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(conversation = %conversation_id, thread = %thread_id))]
    fn find_messages_in_thread(
        &self,
        conversation_id: &ConversationId,
        thread_id: &ThreadId,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT m.id, m.conversation_id, m.role, m.content, m.provider_meta,
                    m.raw_wire, m.created_at
             FROM thread_messages tm
             JOIN messages m ON m.id = tm.message_id
             WHERE tm.thread_id = ?1 AND m.conversation_id = ?2
             ORDER BY tm.position",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![thread_id.as_str(), conversation_id.as_str()],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            // Anything read back from disk is historical by definition.
            message.is_historical = true;
            messages.push(message);
        }
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

/// Collapse `QueryReturnedNoRows` into `None`.
fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Database(e)),
    }
}

fn parse_rfc3339(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, value: String) -> rusqlite::Result<T> {
    serde_json::from_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId(row.get(0)?),
        path: std::path::PathBuf::from(row.get::<_, String>(1)?),
        name: row.get(2)?,
        created_at: parse_rfc3339(3, row.get(3)?)?,
        updated_at: parse_rfc3339(4, row.get(4)?)?,
    })
}

fn row_to_definition(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentDefinition> {
    let provider: String = row.get(3)?;
    Ok(AgentDefinition {
        id: AgentDefinitionId(row.get(0)?),
        name: row.get(1)?,
        system_prompts: parse_json(2, row.get(2)?)?,
        provider: ProviderTag::from_str(&provider).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?,
        model: row.get(4)?,
        tools: parse_json(5, row.get(5)?)?,
        created_at: parse_rfc3339(6, row.get(6)?)?,
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let initiator: Initiator = parse_json(3, row.get(3)?)?;
    Ok(Conversation {
        id: ConversationId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        agent_definition_id: AgentDefinitionId(row.get(2)?),
        initiator,
        current_thread_id: ThreadId(row.get(4)?),
        created_at: parse_rfc3339(5, row.get(5)?)?,
        updated_at: parse_rfc3339(6, row.get(6)?)?,
    })
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: ThreadId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        originated_from_thread: row.get::<_, Option<String>>(2)?.map(ThreadId),
        forked_at_turn: row.get(3)?,
        created_at: parse_rfc3339(4, row.get(4)?)?,
        updated_at: parse_rfc3339(5, row.get(5)?)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let role = Role::from_str(&role).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })?;
    let provider_meta = row
        .get::<_, Option<String>>(4)?
        .map(|s| parse_json(4, s))
        .transpose()?;
    Ok(Message {
        id: MessageId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        role,
        content: parse_json(3, row.get(3)?)?,
        provider_meta,
        raw_wire: row.get(5)?,
        created_at: parse_rfc3339(6, row.get(6)?)?,
        is_historical: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bobbin_core::message::ContentItem;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory store")
    }

    fn seed(store: &SqliteStore) -> (Conversation, Thread) {
        let project = Project::new("/work/demo", "demo");
        store.save_project(&project).unwrap();

        let definition = AgentDefinition::new("coder", ProviderTag::Anthropic)
            .with_system_prompt("You are a coder.");
        store.save_agent_definition(&definition).unwrap();

        let thread_id = ThreadId::new();
        let conversation = Conversation::new(
            project.id.clone(),
            definition.id.clone(),
            Initiator::User,
            thread_id.clone(),
        );
        let thread = Thread {
            id: thread_id,
            conversation_id: conversation.id.clone(),
            originated_from_thread: None,
            forked_at_turn: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.save_conversation(&conversation).unwrap();
        store.save_thread(&thread).unwrap();
        (conversation, thread)
    }

    #[test]
    fn open_creates_a_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bobbin.db");
        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        let project = Project::new("/work/demo", "demo");
        store.save_project(&project).unwrap();
        assert!(path.exists());

        // A second open sees the same data — init_db is idempotent.
        drop(store);
        let reopened = SqliteStore::open(path.to_str().unwrap()).unwrap();
        assert!(reopened.find_project(&project.id).unwrap().is_some());
    }

    #[test]
    fn conversation_round_trips() {
        let store = store();
        let (conversation, _) = seed(&store);
        let loaded = store.find_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(loaded.id, conversation.id);
        assert_eq!(loaded.initiator, Initiator::User);
        assert_eq!(loaded.current_thread_id, conversation.current_thread_id);
    }

    #[test]
    fn missing_rows_are_none() {
        let store = store();
        assert!(store
            .find_conversation(&ConversationId::new())
            .unwrap()
            .is_none());
        assert!(store.find_thread(&ThreadId::new()).unwrap().is_none());
    }

    #[test]
    fn messages_come_back_in_position_order_and_historical() {
        let store = store();
        let (conversation, thread) = seed(&store);

        let first = Message::user(conversation.id.clone(), "first");
        let second = Message::assistant(
            conversation.id.clone(),
            vec![ContentItem::assistant_text("second")],
        );
        store.save_message(&first).unwrap();
        store.save_message(&second).unwrap();
        store.add_thread_message(&thread.id, &first.id, 0).unwrap();
        store.add_thread_message(&thread.id, &second.id, 1).unwrap();

        let loaded = store
            .find_messages_in_thread(&conversation.id, &thread.id)
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].id, second.id);
        assert!(loaded.iter().all(|m| m.is_historical));
        assert_eq!(loaded[0].content, first.content);
    }

    #[test]
    fn duplicate_position_in_thread_is_rejected() {
        let store = store();
        let (conversation, thread) = seed(&store);

        let a = Message::user(conversation.id.clone(), "a");
        let b = Message::user(conversation.id.clone(), "b");
        store.save_message(&a).unwrap();
        store.save_message(&b).unwrap();
        store.add_thread_message(&thread.id, &a.id, 0).unwrap();
        assert!(store.add_thread_message(&thread.id, &b.id, 0).is_err());
    }

    #[test]
    fn message_append_is_append_only() {
        let store = store();
        let (conversation, _) = seed(&store);
        let msg = Message::user(conversation.id.clone(), "once");
        store.save_message(&msg).unwrap();
        assert!(store.save_message(&msg).is_err(), "re-insert must fail");
    }

    #[test]
    fn a_message_can_belong_to_two_threads() {
        let store = store();
        let (conversation, thread) = seed(&store);

        let msg = Message::user(conversation.id.clone(), "shared");
        store.save_message(&msg).unwrap();
        store.add_thread_message(&thread.id, &msg.id, 0).unwrap();

        let fork = Thread::forked(conversation.id.clone(), thread.id.clone(), 1);
        store.save_thread(&fork).unwrap();
        store.add_thread_message(&fork.id, &msg.id, 0).unwrap();

        let in_origin = store
            .find_messages_in_thread(&conversation.id, &thread.id)
            .unwrap();
        let in_fork = store
            .find_messages_in_thread(&conversation.id, &fork.id)
            .unwrap();
        assert_eq!(in_origin[0].id, msg.id);
        assert_eq!(in_fork[0].id, msg.id);
    }

    #[test]
    fn update_current_thread_repoints_conversation() {
        let store = store();
        let (conversation, thread) = seed(&store);

        let fork = Thread::forked(conversation.id.clone(), thread.id.clone(), 0);
        store.save_thread(&fork).unwrap();
        store
            .update_current_thread(&conversation.id, &fork.id)
            .unwrap();

        let loaded = store.find_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(loaded.current_thread_id, fork.id);

        // unknown conversation is an error, not a silent no-op
        assert!(store
            .update_current_thread(&ConversationId::new(), &fork.id)
            .is_err());
    }

    #[test]
    fn definition_round_trips_with_tools_and_prompts() {
        let store = store();
        let mut definition = AgentDefinition::new("restricted", ProviderTag::ClaudeCode)
            .with_system_prompt("fragment one")
            .with_system_prompt("fragment two");
        definition.tools = vec!["read_file".to_string()];
        definition.model = Some("claude-haiku-4-5".to_string());
        store.save_agent_definition(&definition).unwrap();

        let loaded = store
            .find_agent_definition(&definition.id)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, definition);
    }
}
