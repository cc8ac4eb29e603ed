use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::{ChatMessage, ChatOptions, ChatProvider, ChatReply, ModelInfo, ProviderError};

/// Adapter for the OpenAI chat completions API.  The key is read from the
/// `OPENAI_API_KEY` environment variable at call time so a daemon picks up a
/// rotated key without restarting.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ProviderError::NotConfigured(
                "OPENAI_API_KEY is not set; export it or switch to an ollama model".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatReply, ProviderError> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(0.7),
            "max_completion_tokens": options.max_tokens.unwrap_or(2048),
        });

        debug!(model = %self.model, count = messages.len(), "openai chat request");
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let body: serde_json::Value = response.json().await?;
        let message = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"));
        let content = message
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .unwrap_or_default()
            .to_string();
        let role = message
            .and_then(|message| message.get("role"))
            .and_then(|role| role.as_str())
            .unwrap_or("assistant")
            .to_string();

        Ok(ChatReply { content, role })
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/models", self.base_url);
        let response = self.client.get(endpoint).bearer_auth(api_key).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let body: serde_json::Value = response.json().await?;
        let models = body
            .get("data")
            .and_then(|data| data.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(|id| id.as_str()))
                    .map(|id| ModelInfo { id: id.to_string(), name: id.to_string() })
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.api_key().map(|_| ())
    }
}
