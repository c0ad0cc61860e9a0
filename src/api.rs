//! HTTP API
//!
//! Thin axum surface over the chat core. No authentication here; this
//! service sits behind the UI host.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::chat::ChatService;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>) -> Self {
        Self { chat }
    }
}
