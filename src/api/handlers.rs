//! HTTP request handlers

use super::types::{
    ChatRequest, ChatResponse, ErrorResponse, HistoryEntry, SessionIdField, TranscriptResponse,
    WelcomeResponse,
};
use super::AppState;
use crate::chat::{ChatError, IncomingImage};
use crate::store::StoreError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/v1/chat", post(send_chat))
        .route("/v1/chat/:user_id/:session_id", get(get_transcript))
        .with_state(state)
}

async fn welcome() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the Sproutie API! 🌱",
    })
}

async fn send_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let session_id = parse_session_id(req.session_id.as_ref())?;

    let image = req
        .image
        .map(|attachment| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&attachment.data)
                .map_err(|e| AppError::BadRequest(format!("Invalid image encoding: {e}")))?;
            Ok::<_, AppError>(IncomingImage {
                bytes,
                mime_type: attachment.media_type,
            })
        })
        .transpose()?;

    let outcome = state
        .chat
        .handle_message(&req.user_id, session_id, &req.message, image)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ChatResponse {
        response_text: outcome.response_text,
        session_id: outcome.session_number,
        input_tokens: outcome.usage.input_tokens,
        output_tokens: outcome.usage.output_tokens,
        total_tokens: outcome.usage.total_tokens(),
        history: outcome.transcript.iter().map(HistoryEntry::from).collect(),
    }))
}

async fn get_transcript(
    State(state): State<AppState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<TranscriptResponse>, AppError> {
    let sequence = session_id
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("Invalid session identifier: {session_id}")))?;

    let (session_id, turns) = state
        .chat
        .transcript(&user_id, sequence)
        .map_err(AppError::from)?;

    Ok(Json(TranscriptResponse {
        session_id,
        history: turns.iter().map(HistoryEntry::from).collect(),
    }))
}

/// Session ids arrive as numbers or numeric strings; a blank string means
/// "start a new session", anything non-numeric is an error
fn parse_session_id(field: Option<&SessionIdField>) -> Result<Option<i64>, AppError> {
    match field {
        None => Ok(None),
        Some(SessionIdField::Number(n)) => Ok(Some(*n)),
        Some(SessionIdField::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<i64>()
                .map(Some)
                .map_err(|_| AppError::BadRequest(format!("Invalid session identifier: {s}")))
        }
    }
}

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Upstream(String),
    Internal(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::InvalidInput(msg) => AppError::BadRequest(msg),
            ChatError::SessionNotFound { owner, sequence } => {
                AppError::NotFound(format!("Session {sequence} not found for owner {owner}"))
            }
            ChatError::Store(StoreError::ConversationNotFound(id)) => {
                AppError::NotFound(format!("Conversation not found: {id}"))
            }
            ChatError::Store(other) => AppError::Internal(other.to_string()),
            ChatError::Inference(inner) => AppError::Upstream(inner.to_string()),
            ChatError::Upload(inner) => AppError::Upstream(inner.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_session_id(None).unwrap(), None);
        assert_eq!(
            parse_session_id(Some(&SessionIdField::Number(3))).unwrap(),
            Some(3)
        );
        assert_eq!(
            parse_session_id(Some(&SessionIdField::Text("7".to_string()))).unwrap(),
            Some(7)
        );
        assert_eq!(
            parse_session_id(Some(&SessionIdField::Text("  ".to_string()))).unwrap(),
            None
        );
    }

    #[test]
    fn non_numeric_session_id_is_rejected_not_coerced() {
        let err = parse_session_id(Some(&SessionIdField::Text("abc".to_string()))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
