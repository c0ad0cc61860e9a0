//! Flat-file history store
//!
//! One JSON document per `(owner, session)` named `{owner}_session_{n}.json`
//! under a history directory. Suits single-host deployments without SQLite.

use super::types::{Conversation, MediaRef, Role, Turn, UsageData};
use super::{HistoryStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// On-disk document, one per conversation
#[derive(Debug, Serialize, Deserialize)]
struct ConversationFile {
    id: String,
    owner_id: String,
    sequence_number: i64,
    created_at: DateTime<Utc>,
    turns: Vec<Turn>,
}

impl ConversationFile {
    fn header(&self) -> Conversation {
        Conversation {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            sequence_number: self.sequence_number,
            created_at: self.created_at,
        }
    }
}

pub struct FileStore {
    dir: PathBuf,
    /// Serializes sequence allocation and read-modify-write appends
    lock: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn path_for(&self, owner_id: &str, sequence_number: i64) -> PathBuf {
        self.dir
            .join(format!("{owner_id}_session_{sequence_number}.json"))
    }

    fn check_owner(owner_id: &str) -> StoreResult<()> {
        if owner_id.is_empty()
            || owner_id.contains('/')
            || owner_id.contains('\\')
            || owner_id.contains("..")
        {
            return Err(StoreError::InvalidOwner(owner_id.to_string()));
        }
        Ok(())
    }

    fn counter_path(&self, owner_id: &str) -> PathBuf {
        self.dir.join(format!("{owner_id}_sessions.counter"))
    }

    /// Highest session number ever allocated for this owner: the max of the
    /// on-disk documents and the allocation counter, so deleting a
    /// conversation never frees its number. Malformed file names are ignored.
    fn max_sequence(&self, owner_id: &str) -> StoreResult<i64> {
        let prefix = format!("{owner_id}_session_");
        let mut max = fs::read_to_string(self.counter_path(owner_id))
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0);
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(num) = rest.strip_suffix(".json") else {
                continue;
            };
            if let Ok(n) = num.parse::<i64>() {
                max = max.max(n);
            }
        }
        Ok(max)
    }

    fn read_file(path: &Path) -> StoreResult<ConversationFile> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write via temp file + rename so an interrupted write cannot leave a
    /// truncated document behind.
    fn write_file(&self, owner_id: &str, sequence_number: i64, doc: &ConversationFile) -> StoreResult<()> {
        let path = self.path_for(owner_id, sequence_number);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Locate a conversation document by durable key. Linear scan; fine for
    /// the per-owner file counts this backend is meant for.
    fn find_by_id(&self, conversation_id: &str) -> StoreResult<ConversationFile> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(doc) = Self::read_file(&path) {
                if doc.id == conversation_id {
                    return Ok(doc);
                }
            }
        }
        Err(StoreError::ConversationNotFound(conversation_id.to_string()))
    }
}

impl HistoryStore for FileStore {
    fn create_conversation(&self, owner_id: &str) -> StoreResult<Conversation> {
        Self::check_owner(owner_id)?;
        let _guard = self.lock.lock().unwrap();

        let sequence_number = self.max_sequence(owner_id)? + 1;
        fs::write(self.counter_path(owner_id), sequence_number.to_string())?;
        let doc = ConversationFile {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            sequence_number,
            created_at: Utc::now(),
            turns: Vec::new(),
        };
        self.write_file(owner_id, sequence_number, &doc)?;
        Ok(doc.header())
    }

    fn find_conversation(
        &self,
        owner_id: &str,
        sequence_number: i64,
    ) -> StoreResult<Option<Conversation>> {
        Self::check_owner(owner_id)?;
        let path = self.path_for(owner_id, sequence_number);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_file(&path)?.header()))
    }

    fn get_conversation(&self, conversation_id: &str) -> StoreResult<Conversation> {
        Ok(self.find_by_id(conversation_id)?.header())
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
        let _guard = self.lock.lock().unwrap();

        let mut doc = self.find_by_id(conversation_id)?;
        let sequence_id = doc.turns.iter().map(|t| t.sequence_id).max().unwrap_or(0) + 1;
        let turn = Turn {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sequence_id,
            role,
            content: content.to_string(),
            media_refs: media_refs.to_vec(),
            usage: usage.cloned(),
            created_at: Utc::now(),
        };
        doc.turns.push(turn.clone());
        self.write_file(&doc.owner_id, doc.sequence_number, &doc)?;
        Ok(turn)
    }

    fn transcript(&self, conversation_id: &str) -> StoreResult<Vec<Turn>> {
        let mut turns = self.find_by_id(conversation_id)?.turns;
        turns.sort_by_key(|t| t.sequence_id);
        Ok(turns)
    }

    fn collect_media_refs(&self, conversation_id: &str) -> StoreResult<Vec<MediaRef>> {
        let turns = self.transcript(conversation_id)?;
        Ok(super::distinct_refs(&turns))
    }

    fn delete_conversation(&self, conversation_id: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap();
        let doc = self.find_by_id(conversation_id)?;
        fs::remove_file(self.path_for(&doc.owner_id, doc.sequence_number))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn allocates_sequence_numbers_per_owner() {
        let (_dir, store) = open_store();

        assert_eq!(store.create_conversation("alice").unwrap().sequence_number, 1);
        assert_eq!(store.create_conversation("alice").unwrap().sequence_number, 2);
        assert_eq!(store.create_conversation("bob").unwrap().sequence_number, 1);
    }

    #[test]
    fn file_name_matches_owner_and_session() {
        let (dir, store) = open_store();
        store.create_conversation("demo-user-123").unwrap();
        assert!(dir.path().join("demo-user-123_session_1.json").exists());
    }

    #[test]
    fn malformed_file_names_are_ignored_for_allocation() {
        let (dir, store) = open_store();
        fs::write(dir.path().join("alice_session_notanumber.json"), "{}").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "").unwrap();

        assert_eq!(store.create_conversation("alice").unwrap().sequence_number, 1);
    }

    #[test]
    fn rejects_owner_ids_that_escape_the_directory() {
        let (_dir, store) = open_store();
        let err = store.create_conversation("../alice").unwrap_err();
        assert!(matches!(err, StoreError::InvalidOwner(_)));
    }

    #[test]
    fn appends_round_trip_in_order() {
        let (_dir, store) = open_store();
        let conv = store.create_conversation("alice").unwrap();

        store
            .append_turn(&conv.id, Role::User, "hi", &[], None)
            .unwrap();
        store
            .append_turn(
                &conv.id,
                Role::Assistant,
                "hello",
                &[],
                Some(&UsageData {
                    input_tokens: 7,
                    output_tokens: 3,
                }),
            )
            .unwrap();

        let turns = store.transcript(&conv.id).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "hi");
        assert_eq!(turns[1].content, "hello");
        assert_eq!(turns[1].usage.as_ref().unwrap().output_tokens, 3);
    }

    #[test]
    fn append_to_unknown_conversation_fails() {
        let (_dir, store) = open_store();
        let err = store
            .append_turn("missing", Role::User, "hi", &[], None)
            .unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(_)));
    }

    #[test]
    fn lookup_by_durable_key_and_by_owner_sequence_agree() {
        let (_dir, store) = open_store();
        let conv = store.create_conversation("alice").unwrap();

        let by_id = store.get_conversation(&conv.id).unwrap();
        let by_seq = store.find_conversation("alice", 1).unwrap().unwrap();
        assert_eq!(by_id.id, by_seq.id);
    }

    #[test]
    fn delete_removes_the_document_but_not_its_number() {
        let (dir, store) = open_store();
        let conv = store.create_conversation("alice").unwrap();
        store.delete_conversation(&conv.id).unwrap();
        assert!(!dir.path().join("alice_session_1.json").exists());

        // The allocation counter survives the delete
        assert_eq!(store.create_conversation("alice").unwrap().sequence_number, 2);
    }
}
