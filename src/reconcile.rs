//! Transcript reconciliation
//!
//! Rebuilds an inference-ready turn sequence from stored turns. Media
//! references are resolved against the blob service once per distinct
//! reference; anything expired, missing, erroring, or slow is dropped from
//! its turn without failing the request.

use crate::blob::{BlobStore, ResolvedMedia};
use crate::llm::{LlmMessage, LlmRequest, Part};
use crate::store::{MediaRef, Turn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const DEFAULT_PER_REF_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Reconciler {
    blob: Arc<dyn BlobStore>,
    per_ref_timeout: Duration,
}

impl Reconciler {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self {
            blob,
            per_ref_timeout: DEFAULT_PER_REF_TIMEOUT,
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn with_timeout(blob: Arc<dyn BlobStore>, per_ref_timeout: Duration) -> Self {
        Self {
            blob,
            per_ref_timeout,
        }
    }

    /// Build the outgoing request from stored turns.
    ///
    /// `known_refs` is the conversation's distinct reference set (the store's
    /// `collect_media_refs`); each is resolved at most once even when reused
    /// by several turns. The newest user turn is the last stored turn and so
    /// lands last in the request.
    pub async fn build_request(
        &self,
        system: &str,
        turns: &[Turn],
        known_refs: &[MediaRef],
    ) -> LlmRequest {
        let resolved = self.resolve_refs(known_refs).await;

        let mut messages = Vec::with_capacity(turns.len());
        for turn in turns {
            let mut parts = Vec::new();
            if !turn.content.is_empty() {
                parts.push(Part::Text {
                    text: turn.content.clone(),
                });
            }

            for media_ref in &turn.media_refs {
                if let Some(media) = resolved.get(&media_ref.name) {
                    parts.push(Part::FileData {
                        uri: media.uri.clone(),
                        mime_type: media.mime_type.clone(),
                    });
                }
            }

            // A turn that lost all its media and has no text would be an
            // empty content entry; skip it rather than send one
            if parts.is_empty() {
                tracing::warn!(
                    turn = %turn.id,
                    "Turn has no resolvable content left, skipping"
                );
                continue;
            }

            messages.push(LlmMessage {
                role: turn.role,
                parts,
            });
        }

        LlmRequest {
            system: system.to_string(),
            messages,
        }
    }

    /// Resolve each distinct reference once, under a per-reference timeout
    /// so one stuck lookup cannot stall the whole request.
    async fn resolve_refs(&self, refs: &[MediaRef]) -> HashMap<String, ResolvedMedia> {
        let lookups = refs.iter().map(|media_ref| async move {
            let result = timeout(self.per_ref_timeout, self.blob.resolve(media_ref)).await;
            (media_ref, result)
        });

        let mut resolved = HashMap::new();
        for (media_ref, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(Ok(Some(media))) => {
                    resolved.insert(media_ref.name.clone(), media);
                }
                Ok(Ok(None)) => {
                    tracing::warn!(name = %media_ref.name, "Media reference expired, dropping");
                }
                Ok(Err(e)) => {
                    tracing::warn!(name = %media_ref.name, error = %e, "Media lookup failed, dropping");
                }
                Err(_) => {
                    tracing::warn!(name = %media_ref.name, "Media lookup timed out, dropping");
                }
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobError;
    use crate::store::Role;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves only the references it was seeded with; counts lookups
    struct FakeBlobStore {
        known: HashMap<String, ResolvedMedia>,
        delay: Option<Duration>,
        lookups: AtomicUsize,
    }

    impl FakeBlobStore {
        fn with_files(names: &[&str]) -> Self {
            let known = names
                .iter()
                .map(|name| {
                    (
                        (*name).to_string(),
                        ResolvedMedia {
                            uri: format!("https://files.example/{name}"),
                            mime_type: "image/jpeg".to_string(),
                        },
                    )
                })
                .collect();
            Self {
                known,
                delay: None,
                lookups: AtomicUsize::new(0),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl BlobStore for FakeBlobStore {
        async fn upload(&self, _bytes: Vec<u8>, mime_type: &str) -> Result<MediaRef, BlobError> {
            Ok(MediaRef::new("files/uploaded", mime_type))
        }

        async fn resolve(
            &self,
            media_ref: &MediaRef,
        ) -> Result<Option<ResolvedMedia>, BlobError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.known.get(&media_ref.name).cloned())
        }
    }

    fn turn(role: Role, content: &str, refs: &[&str]) -> Turn {
        Turn {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: "conv-1".to_string(),
            sequence_id: 0,
            role,
            content: content.to_string(),
            media_refs: refs
                .iter()
                .map(|name| MediaRef::new(*name, "image/jpeg"))
                .collect(),
            usage: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn expired_ref_is_dropped_and_later_turns_survive() {
        let blob = Arc::new(FakeBlobStore::with_files(&[]));
        let reconciler = Reconciler::new(blob);

        let turns = vec![
            turn(Role::User, "What plant is this?", &["files/expired"]),
            turn(Role::Assistant, "It looks like a Monstera.", &[]),
            turn(Role::User, "Is it toxic to cats?", &[]),
            turn(Role::Assistant, "Yes, mildly.", &[]),
            turn(Role::User, "How often should I water it?", &[]),
        ];
        let refs = vec![MediaRef::new("files/expired", "image/jpeg")];

        let request = reconciler.build_request("sys", &turns, &refs).await;

        assert_eq!(request.messages.len(), 5);
        // Turn 1 kept its text but lost the file part
        assert_eq!(
            request.messages[0].parts,
            vec![Part::Text {
                text: "What plant is this?".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn resolved_refs_attach_at_their_turn_position() {
        let blob = Arc::new(FakeBlobStore::with_files(&["files/a"]));
        let reconciler = Reconciler::new(blob);

        let turns = vec![
            turn(Role::User, "look at this", &["files/a"]),
            turn(Role::Assistant, "nice leaf", &[]),
        ];
        let refs = vec![MediaRef::new("files/a", "image/jpeg")];

        let request = reconciler.build_request("sys", &turns, &refs).await;

        assert_eq!(request.messages[0].parts.len(), 2);
        assert!(matches!(
            &request.messages[0].parts[1],
            Part::FileData { uri, .. } if uri == "https://files.example/files/a"
        ));
        assert_eq!(request.messages[1].parts.len(), 1);
    }

    #[tokio::test]
    async fn reused_ref_is_resolved_once() {
        let blob = Arc::new(FakeBlobStore::with_files(&["files/a"]));
        let reconciler = Reconciler::new(blob.clone());

        let turns = vec![
            turn(Role::User, "first", &["files/a"]),
            turn(Role::User, "again", &["files/a"]),
        ];
        let refs = vec![MediaRef::new("files/a", "image/jpeg")];

        let request = reconciler.build_request("sys", &turns, &refs).await;

        assert_eq!(blob.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(request.messages[0].parts.len(), 2);
        assert_eq!(request.messages[1].parts.len(), 2);
    }

    #[tokio::test]
    async fn stuck_lookup_times_out_and_degrades() {
        let blob =
            Arc::new(FakeBlobStore::with_files(&["files/slow"]).slow(Duration::from_secs(30)));
        let reconciler = Reconciler::with_timeout(blob, Duration::from_millis(50));

        let turns = vec![turn(Role::User, "hello", &["files/slow"])];
        let refs = vec![MediaRef::new("files/slow", "image/jpeg")];

        let request = reconciler.build_request("sys", &turns, &refs).await;

        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].parts.len(), 1);
    }

    #[tokio::test]
    async fn image_only_turn_with_expired_ref_is_skipped() {
        let blob = Arc::new(FakeBlobStore::with_files(&[]));
        let reconciler = Reconciler::new(blob);

        let turns = vec![
            turn(Role::User, "", &["files/expired"]),
            turn(Role::User, "what was that?", &[]),
        ];
        let refs = vec![MediaRef::new("files/expired", "image/jpeg")];

        let request = reconciler.build_request("sys", &turns, &refs).await;

        assert_eq!(request.messages.len(), 1);
        assert_eq!(
            request.messages[0].parts,
            vec![Part::Text {
                text: "what was that?".to_string()
            }]
        );
    }
}
