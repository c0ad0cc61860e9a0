//! External blob-reference service
//!
//! Uploads inbound images and resolves stored references back to provider
//! URIs. References expire out of band (~48h), so `resolve` distinguishes
//! "gone" from "errored".

mod gemini;

pub use gemini::GeminiFileStore;

use crate::store::MediaRef;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob transport error: {0}")]
    Network(String),
    #[error("Blob authentication failed: {0}")]
    Auth(String),
    #[error("Unexpected blob response: {0}")]
    Malformed(String),
}

/// A reference resolved to something the inference provider can fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub uri: String,
    pub mime_type: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload raw bytes, returning an opaque reference usable across later
    /// turns of the same conversation.
    async fn upload(&self, bytes: Vec<u8>, mime_type: &str) -> Result<MediaRef, BlobError>;

    /// Resolve a stored reference. `Ok(None)` means expired or deleted;
    /// callers decide whether that is fatal (it never is during
    /// reconciliation).
    async fn resolve(&self, media_ref: &MediaRef) -> Result<Option<ResolvedMedia>, BlobError>;
}
