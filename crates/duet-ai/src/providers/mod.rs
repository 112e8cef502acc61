//! Chat backend implementations

pub mod ollama;

pub use ollama::OllamaProvider;

use crate::{ChatEventStream, ChatRequest, ModelInfo, Result};
use async_trait::async_trait;

/// Trait for chat backends
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stream a reply for the given request
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatEventStream>;

    /// List the models the backend can serve
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// One-shot completion of a bare prompt, without conversation history
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;
}
