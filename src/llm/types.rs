//! Common types for inference requests

use crate::store::Role;

/// Inference request: system instruction plus the reconciled turn sequence
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub messages: Vec<LlmMessage>,
}

/// One entry in the outgoing turn sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl LlmMessage {
    #[allow(dead_code)] // Used in tests
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
        }
    }
}

/// Content part within a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text { text: String },
    /// Resolved media reference, addressed by provider URI
    FileData { uri: String, mime_type: String },
}

/// Inference response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Usage,
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
