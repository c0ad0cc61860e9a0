//! API request and response types

use crate::store::{Role, Turn};
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    /// Accepts a number or a numeric string; anything else is rejected with
    /// an invalid-session error rather than silently starting a new session
    #[serde(default)]
    pub session_id: Option<SessionIdField>,
    #[serde(default)]
    pub message: String,
    pub image: Option<ImageAttachment>,
}

/// Session id as sent by clients: some send JSON numbers, the UI sends the
/// string from its text box
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SessionIdField {
    Number(i64),
    Text(String),
}

/// Image attachment in a chat message
#[derive(Debug, Clone, Deserialize)]
pub struct ImageAttachment {
    /// Base64-encoded bytes
    pub data: String,
    pub media_type: String,
}

/// Response for a chat message
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response_text: String,
    pub session_id: i64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub history: Vec<HistoryEntry>,
}

/// One transcript entry as exposed to clients
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub has_media: bool,
}

impl From<&Turn> for HistoryEntry {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
            has_media: !turn.media_refs.is_empty(),
        }
    }
}

/// Response for transcript retrieval
#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: i64,
    pub history: Vec<HistoryEntry>,
}

/// Welcome message at the root
#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub message: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
