use anyhow::Result;
use async_trait::async_trait;
use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage as OllamaMessage, MessageRole};
use ollama_rs::generation::parameters::FormatType;
use ollama_rs::Ollama;

use super::providers::{ChatMessage, CompletionOptions, CompletionProvider};

const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Local models served by Ollama on its default port
pub struct OllamaProvider {
    ollama: Ollama,
    model: String,
}

impl OllamaProvider {
    pub fn new(model: Option<String>) -> Self {
        Self {
            ollama: Ollama::default(),
            model: model.unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        }
    }
}

fn to_ollama_message(message: ChatMessage) -> OllamaMessage {
    let role = match message.role.as_str() {
        "system" => MessageRole::System,
        "assistant" => MessageRole::Assistant,
        _ => MessageRole::User,
    };
    OllamaMessage::new(role, message.content)
}

fn build_request(model: String, messages: Vec<ChatMessage>, options: &CompletionOptions) -> ChatMessageRequest {
    let request = ChatMessageRequest::new(
        model,
        messages.into_iter().map(to_ollama_message).collect(),
    );
    if options.json_mode {
        request.format(FormatType::Json)
    } else {
        request
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn chat(&self, messages: Vec<ChatMessage>, options: &CompletionOptions) -> Result<String> {
        // Ollama model names have no vendor prefix; ignore hosted-style ids
        let model = options
            .model
            .as_deref()
            .filter(|m| !m.contains('/'))
            .unwrap_or(&self.model)
            .to_string();

        let request = build_request(model, messages, options);
        let response = self.ollama.send_chat_messages(request).await?;

        Ok(response.message.content)
    }

    fn name(&self) -> &'static str {
        "Ollama"
    }
}
