//! Chat orchestration
//!
//! Ties the pieces together for one inbound message: resolve the session,
//! persist the user turn (uploading any inbound image first), reconcile the
//! transcript into an inference request, call the model, persist the
//! assistant turn with its usage, and hand back the updated transcript.

use crate::blob::{BlobError, BlobStore};
use crate::llm::{LlmError, LlmService, Usage};
use crate::reconcile::Reconciler;
use crate::session::{SessionError, SessionResolver};
use crate::store::{HistoryStore, MediaRef, Role, StoreError, Turn, UsageData};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Session {sequence} not found for owner {owner}")]
    SessionNotFound { owner: String, sequence: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Inference(#[from] LlmError),
    #[error(transparent)]
    Upload(#[from] BlobError),
}

impl From<SessionError> for ChatError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidOwner => {
                ChatError::InvalidInput("owner id must not be empty".to_string())
            }
            SessionError::InvalidSequence(n) => {
                ChatError::InvalidInput(format!("invalid session identifier: {n}"))
            }
            SessionError::NotFound { owner, sequence } => {
                ChatError::SessionNotFound { owner, sequence }
            }
            SessionError::Store(e) => ChatError::Store(e),
        }
    }
}

/// Inbound image attachment, already decoded to raw bytes
pub struct IncomingImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Result of one handled message
#[derive(Debug)]
pub struct ChatOutcome {
    pub response_text: String,
    /// External session number for the caller's next request
    pub session_number: i64,
    pub usage: UsageData,
    pub transcript: Vec<Turn>,
}

pub struct ChatService {
    store: Arc<dyn HistoryStore>,
    llm: Arc<dyn LlmService>,
    blob: Arc<dyn BlobStore>,
    resolver: SessionResolver,
    reconciler: Reconciler,
    system_prompt: String,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        llm: Arc<dyn LlmService>,
        blob: Arc<dyn BlobStore>,
        system_prompt: String,
    ) -> Self {
        let resolver = SessionResolver::new(store.clone());
        let reconciler = Reconciler::new(blob.clone());
        Self {
            store,
            llm,
            blob,
            resolver,
            reconciler,
            system_prompt,
        }
    }

    pub async fn handle_message(
        &self,
        owner_id: &str,
        external_sequence: Option<i64>,
        message: &str,
        image: Option<IncomingImage>,
    ) -> Result<ChatOutcome, ChatError> {
        if message.is_empty() && image.is_none() {
            return Err(ChatError::InvalidInput(
                "message must not be empty unless an image is attached".to_string(),
            ));
        }

        let (conversation_id, session_number) =
            self.resolver.resolve(owner_id, external_sequence)?;

        // Upload failure is an upstream error surfaced before anything is
        // persisted; a half-recorded user turn would poison the transcript
        let media_refs: Vec<MediaRef> = match image {
            Some(image) => vec![self.blob.upload(image.bytes, &image.mime_type).await?],
            None => Vec::new(),
        };

        self.store
            .append_turn(&conversation_id, Role::User, message, &media_refs, None)?;

        let turns = self.store.transcript(&conversation_id)?;
        let known_refs = self.store.collect_media_refs(&conversation_id)?;
        let request = self
            .reconciler
            .build_request(&self.system_prompt, &turns, &known_refs)
            .await;

        // Append the assistant turn only on confirmed success; a failed call
        // must leave the transcript ending with the user turn
        let response = self.llm.complete(&request).await?;
        let usage = to_usage_data(&response.usage);

        self.store.append_turn(
            &conversation_id,
            Role::Assistant,
            &response.text,
            &[],
            Some(&usage),
        )?;

        tracing::info!(
            owner = %owner_id,
            session = session_number,
            conversation = %conversation_id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Handled chat message"
        );

        let transcript = self.store.transcript(&conversation_id)?;
        Ok(ChatOutcome {
            response_text: response.text,
            session_number,
            usage,
            transcript,
        })
    }

    /// Full transcript for an existing session, oldest first
    pub fn transcript(
        &self,
        owner_id: &str,
        external_sequence: i64,
    ) -> Result<(i64, Vec<Turn>), ChatError> {
        let (conversation_id, session_number) =
            self.resolver.resolve(owner_id, Some(external_sequence))?;
        Ok((session_number, self.store.transcript(&conversation_id)?))
    }
}

fn to_usage_data(usage: &Usage) -> UsageData {
    UsageData {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::ResolvedMedia;
    use crate::llm::{LlmRequest, LlmResponse};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted inference collaborator; records the requests it saw
    struct FakeLlm {
        replies: Mutex<Vec<Result<LlmResponse, LlmError>>>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl FakeLlm {
        fn replying(text: &str, input_tokens: u64, output_tokens: u64) -> Self {
            Self::scripted(vec![Ok(LlmResponse {
                text: text.to_string(),
                usage: Usage {
                    input_tokens,
                    output_tokens,
                },
            })])
        }

        fn scripted(mut replies: Vec<Result<LlmResponse, LlmError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmService for FakeLlm {
        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .expect("no scripted reply left")
        }

        fn model_id(&self) -> &str {
            "fake-model"
        }
    }

    /// Blob store where every upload succeeds and every ref resolves
    struct FakeBlob;

    #[async_trait]
    impl BlobStore for FakeBlob {
        async fn upload(&self, _bytes: Vec<u8>, mime_type: &str) -> Result<MediaRef, BlobError> {
            Ok(MediaRef::new("files/upload-1", mime_type))
        }

        async fn resolve(
            &self,
            media_ref: &MediaRef,
        ) -> Result<Option<ResolvedMedia>, BlobError> {
            Ok(Some(ResolvedMedia {
                uri: format!("https://files.example/{}", media_ref.name),
                mime_type: media_ref.mime_type.clone(),
            }))
        }
    }

    fn service(llm: Arc<FakeLlm>) -> ChatService {
        ChatService::new(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            llm,
            Arc::new(FakeBlob),
            "You are a helpful plant assistant.".to_string(),
        )
    }

    #[tokio::test]
    async fn first_message_allocates_session_one_and_records_both_turns() {
        let llm = Arc::new(FakeLlm::replying("It looks like a Monstera.", 120, 15));
        let chat = service(llm.clone());

        let outcome = chat
            .handle_message(
                "alice",
                None,
                "What plant is this?",
                Some(IncomingImage {
                    bytes: vec![0xff, 0xd8],
                    mime_type: "image/jpeg".to_string(),
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.session_number, 1);
        assert_eq!(outcome.response_text, "It looks like a Monstera.");
        assert_eq!(outcome.usage.input_tokens, 120);
        assert_eq!(outcome.usage.output_tokens, 15);

        assert_eq!(outcome.transcript.len(), 2);
        assert_eq!(outcome.transcript[0].role, Role::User);
        assert_eq!(outcome.transcript[0].media_refs.len(), 1);
        assert_eq!(outcome.transcript[1].role, Role::Assistant);
        assert_eq!(
            outcome.transcript[1].usage,
            Some(UsageData {
                input_tokens: 120,
                output_tokens: 15
            })
        );
    }

    #[tokio::test]
    async fn followup_reuses_the_session_and_sends_prior_turns_in_order() {
        let llm = Arc::new(FakeLlm::scripted(vec![
            Ok(LlmResponse {
                text: "It looks like a Monstera.".to_string(),
                usage: Usage {
                    input_tokens: 120,
                    output_tokens: 15,
                },
            }),
            Ok(LlmResponse {
                text: "About once a week.".to_string(),
                usage: Usage {
                    input_tokens: 150,
                    output_tokens: 8,
                },
            }),
        ]));
        let chat = service(llm.clone());

        let first = chat
            .handle_message("alice", None, "What plant is this?", None)
            .await
            .unwrap();
        let second = chat
            .handle_message(
                "alice",
                Some(first.session_number),
                "How often should I water it?",
                None,
            )
            .await
            .unwrap();

        assert_eq!(second.session_number, 1);
        assert_eq!(second.transcript.len(), 4);
        assert_eq!(
            second.transcript[0].conversation_id,
            first.transcript[0].conversation_id
        );

        // The second inference request carried both prior turns plus the new
        // message, in original order
        let seen = llm.seen.lock().unwrap();
        let request = &seen[1];
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.messages[1].role, Role::Assistant);
        assert_eq!(request.messages[2].role, Role::User);
    }

    #[tokio::test]
    async fn failed_inference_appends_no_assistant_turn() {
        let llm = Arc::new(FakeLlm::scripted(vec![
            Err(LlmError::auth("key rejected")),
            Ok(LlmResponse {
                text: "recovered".to_string(),
                usage: Usage::default(),
            }),
        ]));
        let chat = service(llm);

        let err = chat
            .handle_message("alice", None, "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Inference(_)));

        // The user turn persisted but no assistant turn followed it
        let (_, transcript) = chat.transcript("alice", 1).unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::User);
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let llm = Arc::new(FakeLlm::scripted(vec![]));
        let chat = service(llm);

        let err = chat
            .handle_message("alice", Some(9), "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::SessionNotFound { sequence: 9, .. }
        ));
    }

    #[tokio::test]
    async fn empty_message_without_image_is_invalid() {
        let llm = Arc::new(FakeLlm::scripted(vec![]));
        let chat = service(llm);

        let err = chat.handle_message("alice", None, "", None).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn historical_image_reattaches_on_followup() {
        let llm = Arc::new(FakeLlm::scripted(vec![
            Ok(LlmResponse {
                text: "A Monstera.".to_string(),
                usage: Usage::default(),
            }),
            Ok(LlmResponse {
                text: "Weekly.".to_string(),
                usage: Usage::default(),
            }),
        ]));
        let chat = service(llm.clone());

        chat.handle_message(
            "alice",
            None,
            "What plant is this?",
            Some(IncomingImage {
                bytes: vec![1, 2, 3],
                mime_type: "image/jpeg".to_string(),
            }),
        )
        .await
        .unwrap();
        chat.handle_message("alice", Some(1), "How often should I water it?", None)
            .await
            .unwrap();

        let seen = llm.seen.lock().unwrap();
        let followup = &seen[1];
        // Turn 1 still carries its image in the reconstructed request
        assert!(followup.messages[0]
            .parts
            .iter()
            .any(|p| matches!(p, crate::llm::Part::FileData { .. })));
    }
}
