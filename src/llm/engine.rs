//! Generation capability consumed by the chat coordinator.
//!
//! A `GenerationEngine` is the producer half of the token handoff: it pushes
//! `StreamEvent`s into the channel it is given and reports its own outcome
//! through its return value. The two are independent; a closed channel does
//! not mean the generation succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::errors::ChatError;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Done,
    Error(String),
}

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(
        &self,
        request: ChatRequest,
        tokens: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ChatError>;
}

/// Drives a streaming chat completion on an `LlmProvider`.
pub struct LlmGenerationEngine {
    provider: Arc<dyn LlmProvider>,
}

impl LlmGenerationEngine {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl GenerationEngine for LlmGenerationEngine {
    async fn generate(
        &self,
        request: ChatRequest,
        tokens: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ChatError> {
        let mut stream = match self.provider.stream_chat(&request).await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = tokens.send(StreamEvent::Error(err.to_string())).await;
                return Err(ChatError::generation(err));
            }
        };

        let mut produced = 0usize;
        while let Some(chunk) = stream.recv().await {
            match chunk {
                Ok(token) => {
                    if token.is_empty() {
                        continue;
                    }
                    produced += 1;
                    // The consumer keeps reading until Done, so a failed send
                    // only happens once it is gone for good.
                    let _ = tokens.send(StreamEvent::Token(token)).await;
                }
                Err(err) => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        tokens = produced,
                        "Generation stream failed: {}",
                        err
                    );
                    let _ = tokens.send(StreamEvent::Error(err.to_string())).await;
                    return Err(ChatError::generation(err));
                }
            }
        }

        tracing::debug!(provider = self.provider.name(), tokens = produced, "Generation finished");
        let _ = tokens.send(StreamEvent::Done).await;
        Ok(())
    }
}
