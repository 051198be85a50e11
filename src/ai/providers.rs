use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ollama::OllamaProvider;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    #[value(name = "openrouter")]
    OpenRouter,
    #[value(name = "openai")]
    OpenAI,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Overrides the provider's default model
    pub model: Option<String>,
    /// Ask the provider for a bare JSON object
    pub json_mode: bool,
    pub max_tokens: Option<u32>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>, options: &CompletionOptions) -> Result<String>;
    fn name(&self) -> &'static str;
}

/// Any endpoint speaking the OpenAI chat completions protocol
pub struct OpenAICompatibleProvider {
    client: Client,
    name: &'static str,
    api_key: String,
    model: String,
    base_url: String,
    extra_headers: Vec<(&'static str, String)>,
}

impl OpenAICompatibleProvider {
    pub fn openai(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            name: "OpenAI",
            api_key,
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            extra_headers: Vec::new(),
        }
    }

    pub fn openrouter(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            name: "OpenRouter",
            api_key,
            model: model.unwrap_or_else(|| super::enhance::DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            extra_headers: vec![
                ("HTTP-Referer", "https://metaprompt.studio".to_string()),
                ("X-Title", "MetaPrompt".to_string()),
            ],
        }
    }

    fn build_request(&self, messages: Vec<ChatMessage>, options: &CompletionOptions) -> OpenAIRequest {
        OpenAIRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: messages
                .into_iter()
                .map(|m| OpenAIMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            max_tokens: options.max_tokens,
            temperature: 0.7,
            response_format: options.json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[async_trait]
impl CompletionProvider for OpenAICompatibleProvider {
    async fn chat(&self, messages: Vec<ChatMessage>, options: &CompletionOptions) -> Result<String> {
        let request = self.build_request(messages, options);
        tracing::debug!("Calling {} with model {}", self.name, request.model);

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to call {} API", self.name))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            tracing::error!("{} API error: {} - {}", self.name, status, text);
            anyhow::bail!("{} API error: {} - {}", self.name, status, text);
        }

        let data: OpenAIResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.name))?;

        data.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from {}", self.name))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider {
        LlmProvider::OpenRouter => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENROUTER_API_KEY is not set"))?;
            Ok(Arc::new(OpenAICompatibleProvider::openrouter(
                api_key,
                config.model.clone(),
                config.base_url.clone(),
            )))
        }
        LlmProvider::OpenAI => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OpenAI API key required"))?;
            Ok(Arc::new(OpenAICompatibleProvider::openai(
                api_key,
                config.model.clone(),
                config.base_url.clone(),
            )))
        }
        LlmProvider::Ollama => Ok(Arc::new(OllamaProvider::new(config.model.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.provider, LlmProvider::OpenRouter);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_create_provider_missing_key() {
        let config = LlmConfig {
            provider: LlmProvider::OpenRouter,
            api_key: None,
            model: None,
            base_url: None,
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: LlmProvider::Ollama,
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "Ollama");
    }

    #[test]
    fn test_request_json_mode_and_model_override() {
        let provider = OpenAICompatibleProvider::openrouter("key".to_string(), None, None);
        let options = CompletionOptions {
            model: Some("openai/gpt-4o".to_string()),
            json_mode: true,
            max_tokens: None,
        };
        let request = provider.build_request(vec![ChatMessage::user("hi")], &options);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "openai/gpt-4o");
        assert_eq!(json["response_format"]["type"], "json_object");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_request_default_model() {
        let provider = OpenAICompatibleProvider::openrouter("key".to_string(), None, None);
        let request = provider.build_request(vec![], &CompletionOptions::default());
        assert_eq!(request.model, "anthropic/claude-3.5-sonnet");
        assert!(request.response_format.is_none());
    }
}
