use rusqlite::Connection;

use crate::error::Result;

/// Initialise all conversation tables and their indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projects (
            id          TEXT PRIMARY KEY,
            path        TEXT NOT NULL,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS agent_definitions (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            system_prompts  TEXT NOT NULL,
            provider        TEXT NOT NULL,
            model           TEXT,
            tools           TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                   TEXT PRIMARY KEY,
            project_id           TEXT NOT NULL,
            agent_definition_id  TEXT NOT NULL,
            initiator            TEXT NOT NULL,
            current_thread_id    TEXT NOT NULL,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS threads (
            id                      TEXT PRIMARY KEY,
            conversation_id         TEXT NOT NULL,
            originated_from_thread  TEXT,
            forked_at_turn          INTEGER,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_threads_conversation
            ON threads(conversation_id);

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL,
            role             TEXT NOT NULL,
            content          TEXT NOT NULL,
            provider_meta    TEXT,
            raw_wire         TEXT,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        -- Thread membership: position is thread-local, gap-free from 0.
        CREATE TABLE IF NOT EXISTS thread_messages (
            thread_id   TEXT NOT NULL,
            position    INTEGER NOT NULL,
            message_id  TEXT NOT NULL,
            PRIMARY KEY (thread_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_thread_messages_message
            ON thread_messages(message_id);",
    )?;
    Ok(())
}
