//! Storage record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A durable, owner-scoped conversation thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Durable key, never exposed as the external session number
    pub id: String,
    pub owner_id: String,
    /// Owner-scoped session number, assigned monotonically starting at 1
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
}

/// Turn role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Opaque handle to an externally stored file.
///
/// The provider expires uploads out of band (~48h), so any stored reference
/// may be unresolvable at read time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MediaRef {
    /// Provider-assigned resource name, e.g. `files/abc123`
    pub name: String,
    pub mime_type: String,
}

impl MediaRef {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Token accounting for an assistant turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageData {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageData {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One message within a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    /// Per-conversation append counter; the authoritative order key.
    /// `created_at` is advisory only.
    pub sequence_id: i64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_refs: Vec<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageData>,
    pub created_at: DateTime<Utc>,
}
