//! Conversation history storage
//!
//! Append-only transcript persistence behind a backend-agnostic trait.
//! Session resolution and reconciliation never know which backend is in use.

mod file;
mod sqlite;
mod types;

pub use file::FileStore;
pub use sqlite::SqliteStore;
pub use types::{Conversation, MediaRef, Role, Turn, UsageData};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt history record: {0}")]
    Corrupt(String),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Owner id not usable by this store: {0}")]
    InvalidOwner(String),
    #[error("Turn has neither content nor media")]
    EmptyTurn,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract for conversations and their turns.
///
/// Implementations must allocate owner-scoped sequence numbers atomically
/// (read-max-then-insert under a single lock) and must keep turn appends
/// atomic per turn.
pub trait HistoryStore: Send + Sync {
    /// Create a conversation for `owner_id`, allocating the next
    /// owner-scoped sequence number (1, 2, 3, ... — never reused).
    fn create_conversation(&self, owner_id: &str) -> StoreResult<Conversation>;

    /// Look up a conversation by `(owner, sequence number)`.
    fn find_conversation(
        &self,
        owner_id: &str,
        sequence_number: i64,
    ) -> StoreResult<Option<Conversation>>;

    /// Look up a conversation by durable key.
    fn get_conversation(&self, conversation_id: &str) -> StoreResult<Conversation>;

    /// Append a turn in creation order. Fails with `ConversationNotFound`
    /// for an unknown durable key, leaving the store unchanged.
    fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        media_refs: &[MediaRef],
        usage: Option<&UsageData>,
    ) -> StoreResult<Turn>;

    /// All turns for a conversation, oldest first.
    fn transcript(&self, conversation_id: &str) -> StoreResult<Vec<Turn>>;

    /// Distinct media references ever attached to any turn in the
    /// conversation, in first-appearance order.
    fn collect_media_refs(&self, conversation_id: &str) -> StoreResult<Vec<MediaRef>>;

    /// Delete a conversation and all its turns.
    fn delete_conversation(&self, conversation_id: &str) -> StoreResult<()>;
}

/// Shared append-turn validation: content may be empty only when media
/// references are present.
fn validate_turn(content: &str, media_refs: &[MediaRef]) -> StoreResult<()> {
    if content.is_empty() && media_refs.is_empty() {
        return Err(StoreError::EmptyTurn);
    }
    Ok(())
}

/// Distinct refs in first-appearance order across an ordered transcript.
fn distinct_refs(turns: &[Turn]) -> Vec<MediaRef> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for turn in turns {
        for media_ref in &turn.media_refs {
            if seen.insert(media_ref.clone()) {
                out.push(media_ref.clone());
            }
        }
    }
    out
}
