use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::{ChatMessage, ChatOptions, ChatProvider, ChatReply, ModelInfo, ProviderError};

/// Adapter for a local Ollama server (`/api/chat`, `/api/tags`).
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        let base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| base_url.to_string());
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatReply, ProviderError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": options.temperature.unwrap_or(0.7),
                "num_predict": options.max_tokens.unwrap_or(2048),
            },
        });

        debug!(model = %self.model, count = messages.len(), "ollama chat request");
        let response = self.client.post(endpoint).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .unwrap_or_default()
            .to_string();
        let role = body
            .get("message")
            .and_then(|message| message.get("role"))
            .and_then(|role| role.as_str())
            .unwrap_or("assistant")
            .to_string();

        Ok(ChatReply { content, role })
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let endpoint = format!("{}/api/tags", self.base_url);
        let response = self.client.get(endpoint).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let body: serde_json::Value = response.json().await?;
        let models = body
            .get("models")
            .and_then(|models| models.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let id = item.get("model").and_then(|m| m.as_str())?;
                        let name = item
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or(id);
                        Some(ModelInfo { id: id.to_string(), name: name.to_string() })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}
