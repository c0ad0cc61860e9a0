//! Gemini Files API client

use super::{BlobError, BlobStore, ResolvedMedia};
use crate::store::MediaRef;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiFileStore {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiFileStore {
    pub fn new(api_key: String) -> Result<Self, BlobError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, BlobError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BlobError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for GeminiFileStore {
    async fn upload(&self, bytes: Vec<u8>, mime_type: &str) -> Result<MediaRef, BlobError> {
        let url = format!(
            "{}/upload/v1beta/files?key={}",
            self.base_url, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("Content-Type", mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| BlobError::Network(format!("Upload failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BlobError::Network(format!("Failed to read upload response: {e}")))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BlobError::Auth(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            return Err(BlobError::Network(format!("HTTP {status}: {body}")));
        }

        let uploaded: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| BlobError::Malformed(format!("Bad upload response: {e}")))?;

        tracing::info!(name = %uploaded.file.name, mime = %mime_type, "Uploaded file");
        Ok(MediaRef::new(uploaded.file.name, mime_type))
    }

    async fn resolve(&self, media_ref: &MediaRef) -> Result<Option<ResolvedMedia>, BlobError> {
        let url = format!(
            "{}/v1beta/{}?key={}",
            self.base_url, media_ref.name, self.api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BlobError::Network(format!("Lookup failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BlobError::Auth(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BlobError::Network(format!("Failed to read lookup response: {e}")))?;

        if !status.is_success() {
            return Err(BlobError::Network(format!("HTTP {status}: {body}")));
        }

        let file: FileMetadata = serde_json::from_str(&body)
            .map_err(|e| BlobError::Malformed(format!("Bad file metadata: {e}")))?;

        // The provider keeps expired entries listable for a while with a
        // terminal state instead of a 404
        if file.state.as_deref() == Some("EXPIRED") || file.uri.is_none() {
            return Ok(None);
        }

        Ok(Some(ResolvedMedia {
            uri: file.uri.unwrap_or_default(),
            mime_type: file
                .mime_type
                .unwrap_or_else(|| media_ref.mime_type.clone()),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata {
    uri: Option<String>,
    mime_type: Option<String>,
    state: Option<String>,
}
