//! SQLite-backed history store

use super::types::{Conversation, MediaRef, Role, Turn, UsageData};
use super::{HistoryStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQL schema for initialization
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    sequence_number INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE (owner_id, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner_id);

CREATE TABLE IF NOT EXISTS turns (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    media_refs TEXT NOT NULL,
    usage_data TEXT,
    created_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, sequence_id);
"#;

/// Thread-safe database handle.
///
/// The single mutex-guarded connection is the serialization point: sequence
/// allocation and the matching insert always run inside one lock section.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conversation_exists(conn: &Connection, conversation_id: &str) -> StoreResult<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

impl HistoryStore for SqliteStore {
    fn create_conversation(&self, owner_id: &str) -> StoreResult<Conversation> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        // Read-max + insert under the connection lock so two concurrent
        // resolutions for the same owner cannot allocate the same number.
        let sequence_number: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM conversations WHERE owner_id = ?1",
            params![owner_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO conversations (id, owner_id, sequence_number, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, owner_id, sequence_number, now.to_rfc3339()],
        )?;

        Ok(Conversation {
            id,
            owner_id: owner_id.to_string(),
            sequence_number,
            created_at: now,
        })
    }

    fn find_conversation(
        &self,
        owner_id: &str,
        sequence_number: i64,
    ) -> StoreResult<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, sequence_number, created_at
             FROM conversations WHERE owner_id = ?1 AND sequence_number = ?2",
        )?;

        let result = stmt.query_row(params![owner_id, sequence_number], row_to_conversation);
        match result {
            Ok(conversation) => Ok(Some(conversation)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    fn get_conversation(&self, conversation_id: &str) -> StoreResult<Conversation> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, sequence_number, created_at
             FROM conversations WHERE id = ?1",
        )?;

        stmt.query_row(params![conversation_id], row_to_conversation)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::ConversationNotFound(conversation_id.to_string())
                }
                other => StoreError::Sqlite(other),
            })
    }

    fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        media_refs: &[MediaRef],
        usage: Option<&UsageData>,
    ) -> StoreResult<Turn> {
        super::validate_turn(content, media_refs)?;

        let conn = self.conn.lock().unwrap();
        if !Self::conversation_exists(&conn, conversation_id)? {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
        }

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM turns WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;

        let refs_json = serde_json::to_string(media_refs)?;
        let usage_json = usage.map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT INTO turns (id, conversation_id, sequence_id, role, content, media_refs, usage_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                conversation_id,
                sequence_id,
                role.to_string(),
                content,
                refs_json,
                usage_json,
                now.to_rfc3339(),
            ],
        )?;

        Ok(Turn {
            id,
            conversation_id: conversation_id.to_string(),
            sequence_id,
            role,
            content: content.to_string(),
            media_refs: media_refs.to_vec(),
            usage: usage.cloned(),
            created_at: now,
        })
    }

    fn transcript(&self, conversation_id: &str) -> StoreResult<Vec<Turn>> {
        let conn = self.conn.lock().unwrap();
        if !Self::conversation_exists(&conn, conversation_id)? {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
        }

        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, role, content, media_refs, usage_data, created_at
             FROM turns WHERE conversation_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (id, conversation_id, sequence_id, role, content, refs_json, usage_json, created) =
                row?;
            turns.push(Turn {
                id,
                conversation_id,
                sequence_id,
                role: parse_role(&role)?,
                content,
                media_refs: serde_json::from_str(&refs_json)?,
                usage: usage_json.map(|s| serde_json::from_str(&s)).transpose()?,
                created_at: parse_datetime(&created),
            });
        }
        Ok(turns)
    }

    fn collect_media_refs(&self, conversation_id: &str) -> StoreResult<Vec<MediaRef>> {
        let turns = self.transcript(conversation_id)?;
        Ok(super::distinct_refs(&turns))
    }

    fn delete_conversation(&self, conversation_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        // Turns are deleted by CASCADE
        let deleted = conn.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![conversation_id],
        )?;

        if deleted == 0 {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
        }
        Ok(())
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        sequence_number: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn parse_role(s: &str) -> StoreResult<Role> {
    match s {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => Err(StoreError::Corrupt(format!("unknown role: {other}"))),
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
