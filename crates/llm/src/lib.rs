//! Model-provider interface and the REST adapters behind it.
//!
//! Providers are thin wrappers: they assemble a request body, call one HTTP
//! endpoint, and normalise the reply to [`ChatReply`].  Everything clever
//! (tool loop, prompt assembly, recovery) lives in `parley-agent`.

use serde::{Deserialize, Serialize};

mod error;
mod ollama;
mod openai;
mod provider;

pub use error::ProviderError;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{ChatProvider, provider_for};

// ── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation.  Ordered sequences of these form the
/// conversation the orchestrator drives and the store persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ── Options & replies ────────────────────────────────────────────────────────

/// Per-call generation options.  `None` fields fall back to provider defaults
/// (temperature 0.7, 2048 max tokens); the orchestrator pins temperature to
/// 0.0 unless a caller overrides it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let message = ChatMessage::user("hello");
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn message_roundtrip() {
        let message = ChatMessage::assistant("hi there");
        let json = serde_json::to_string(&message).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn default_options_leave_provider_defaults() {
        let options = ChatOptions::default();
        assert!(options.temperature.is_none());
        assert!(options.max_tokens.is_none());
    }
}
