//! Runs one generation and turns its token stream into response records.
//!
//! The engine runs in its own task and pushes `StreamEvent`s over a channel.
//! The coordinator drains the channel, emitting records as configured, then
//! always joins the task. A task failure surfaces as `ChatError::Generation`
//! even when every token was already delivered.
//!
//! If the record consumer goes away, draining continues and tokens are
//! discarded; the engine is not cancelled.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::envelope::{RecordSender, ResponseRecord};
use super::prompt::build_chat_request;
use crate::core::errors::ChatError;
use crate::llm::{GenerationEngine, GenerationRequest, StreamEvent};

const TOKEN_BUFFER: usize = 64;

pub struct GenerationCoordinator {
    engine: Arc<dyn GenerationEngine>,
}

/// Tracks whether the record consumer is still listening.
struct Output<'a> {
    sender: &'a RecordSender,
    open: bool,
}

impl Output<'_> {
    async fn emit(&mut self, record: ResponseRecord) {
        if !self.open {
            return;
        }
        if self.sender.send(Ok(record)).await.is_err() {
            tracing::debug!("Response consumer disconnected; draining generation");
            self.open = false;
        }
    }
}

impl GenerationCoordinator {
    pub fn new(engine: Arc<dyn GenerationEngine>) -> Self {
        Self { engine }
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
        template: &str,
        citations: Vec<String>,
        streaming: bool,
        out: &RecordSender,
    ) -> Result<(), ChatError> {
        let chat_request = build_chat_request(&request, template);

        let (tx, mut rx) = mpsc::channel(TOKEN_BUFFER);
        let engine = self.engine.clone();
        let task = tokio::spawn(async move { engine.generate(chat_request, tx).await });

        let mut output = Output {
            sender: out,
            open: true,
        };
        let mut answer = String::new();
        let mut stream_error = None;
        let mut tokens = 0usize;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    tokens += 1;
                    if streaming {
                        output.emit(ResponseRecord::answer(token)).await;
                    } else {
                        answer.push_str(&token);
                    }
                }
                StreamEvent::Done => break,
                StreamEvent::Error(cause) => {
                    stream_error = Some(cause);
                    break;
                }
            }
        }
        drop(rx);

        let outcome = match task.await {
            Ok(result) => result,
            Err(join_err) => Err(ChatError::Generation(format!(
                "generation task did not complete: {}",
                join_err
            ))),
        };
        let outcome = outcome.and_then(|()| match stream_error {
            Some(cause) => Err(ChatError::Generation(cause)),
            None => Ok(()),
        });

        if let Err(err) = outcome {
            if output.open {
                tracing::error!(tokens, "Generation failed: {}", err);
            } else {
                tracing::warn!(tokens, "Generation failed after consumer disconnected: {}", err);
            }
            return Err(err);
        }

        tracing::debug!(tokens, streaming, "Generation completed");
        let terminal = if streaming {
            ResponseRecord::docs(citations)
        } else {
            ResponseRecord::complete(answer, citations)
        };
        output.emit(terminal).await;
        Ok(())
    }
}
