use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::ChatRequest;
use crate::core::errors::LlmError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "openai_compat")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// chat completion (streaming); the receiver closes when the model is done
    async fn stream_chat(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError>;

    /// generate embeddings
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, LlmError>;
}
