use std::sync::Arc;

use async_trait::async_trait;

use parley_config::AppConfig;

use crate::{ChatMessage, ChatOptions, ChatReply, ModelInfo, OllamaProvider, OpenAiProvider, ProviderError};

/// Uniform capability every model backend implements.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatReply, ProviderError>;

    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError>;

    /// One-time setup (credential checks etc.).  Default: nothing to do.
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Resolve the configured `provider:model` string to a live adapter.
pub fn provider_for(config: &AppConfig) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    let (provider, model) = config.active_model();
    match provider {
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            &config.llm.ollama_base_url,
            model,
        ))),
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            &config.llm.openai_base_url,
            model,
        ))),
        other => Err(ProviderError::NotConfigured(format!(
            "unknown provider \"{other}\" in model \"{}\"",
            config.llm.model
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_ollama_by_default() {
        let config = AppConfig::default();
        let provider = provider_for(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn resolves_openai_prefix() {
        let mut config = AppConfig::default();
        config.llm.model = "openai:gpt-4o-mini".to_string();
        let provider = provider_for(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn unknown_provider_is_not_configured() {
        let mut config = AppConfig::default();
        config.llm.model = "copilot:gpt-4".to_string();
        assert!(matches!(
            provider_for(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
