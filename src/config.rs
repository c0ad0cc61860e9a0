//! Process configuration
//!
//! Built once in `main` and passed down explicitly; nothing here is a
//! module-level global.

use crate::llm::DEFAULT_MODEL;

/// Which persistence backend to use
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// SQLite database at the given path
    Sqlite(String),
    /// One JSON document per session under the given directory
    File(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub backend: StorageBackend,
    pub gemini_api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("SPROUTIE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        // Setting a history directory selects the flat-file backend
        let backend = match std::env::var("SPROUTIE_HISTORY_DIR") {
            Ok(dir) => StorageBackend::File(dir),
            Err(_) => {
                let db_path = std::env::var("SPROUTIE_DB_PATH").unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                    format!("{home}/.sproutie/sproutie.db")
                });
                StorageBackend::Sqlite(db_path)
            }
        };

        let model =
            std::env::var("SPROUTIE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let prompt_path = std::env::var("SPROUTIE_SYSTEM_PROMPT")
            .unwrap_or_else(|_| "sproutie_system_prompt.md".to_string());

        Self {
            port,
            backend,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            model,
            system_prompt: load_system_prompt(&prompt_path),
        }
    }
}

fn load_system_prompt(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            tracing::warn!(path = %path, "System prompt file not found, using default");
            "You are a helpful plant assistant.".to_string()
        }
    }
}
