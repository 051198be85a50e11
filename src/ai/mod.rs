pub mod enhance;
pub mod ollama;
pub mod providers;

pub use enhance::{enhance, EnhanceRequest, EnhancementResult};
pub use providers::{create_provider, CompletionProvider, LlmConfig, LlmProvider};
