//! Knowledge base chat: retrieval, no-match handling, grounding and generation.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::citation::format_citations;
use super::context::build_context;
use super::coordinator::GenerationCoordinator;
use super::envelope::{short_circuit_records, RecordReceiver, RecordSender};
use super::no_match::{Decision, NoMatchPolicy};
use crate::core::errors::ChatError;
use crate::llm::{ChatMessage, GenerationEngine, GenerationRequest, ModelParameters};
use crate::rag::{dump, Retriever};

const RECORD_BUFFER: usize = 64;

/// Everything one chat invocation needs.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub query: String,
    pub knowledge_base_name: String,
    pub top_k: usize,
    pub score_threshold: f32,
    pub history: Vec<ChatMessage>,
    pub stream: bool,
    pub model: ModelParameters,
    pub prompt_template: String,
}

pub struct KnowledgeBaseChat {
    retriever: Retriever,
    coordinator: GenerationCoordinator,
    no_match: NoMatchPolicy,
    dump_dir: Option<PathBuf>,
}

impl KnowledgeBaseChat {
    pub fn new(retriever: Retriever, engine: Arc<dyn GenerationEngine>, no_match: NoMatchPolicy) -> Self {
        Self {
            retriever,
            coordinator: GenerationCoordinator::new(engine),
            no_match,
            dump_dir: None,
        }
    }

    /// Write every retrieval result set to `dir`.
    pub fn with_dump_dir(mut self, dir: PathBuf) -> Self {
        self.dump_dir = Some(dir);
        self
    }

    pub async fn ensure_knowledge_base(&self, kb_name: &str) -> Result<(), ChatError> {
        if self.retriever.knowledge_base_exists(kb_name).await? {
            Ok(())
        } else {
            Err(ChatError::KnowledgeBaseNotFound(kb_name.to_string()))
        }
    }

    /// Runs one invocation, writing records to `out` in order.
    pub async fn run(&self, params: ChatParams, out: &RecordSender) -> Result<(), ChatError> {
        let docs = self
            .retriever
            .retrieve(
                &params.query,
                &params.knowledge_base_name,
                params.top_k,
                params.score_threshold,
            )
            .await?;

        if let Some(dir) = &self.dump_dir {
            if let Err(err) = dump::save_documents(
                &docs,
                &params.knowledge_base_name,
                &params.query,
                "retrieved",
                dir,
            )
            .await
            {
                tracing::warn!("Failed to dump retrieved documents: {}", err);
            }
        }

        if let Decision::ShortCircuit(answer) = self.no_match.decide(docs.len()) {
            tracing::info!(kb = %params.knowledge_base_name, "No match, answering with fallback text");
            for record in short_circuit_records(&answer, params.stream) {
                if out.send(Ok(record)).await.is_err() {
                    break;
                }
            }
            return Ok(());
        }

        let request = GenerationRequest {
            grounding_context: build_context(&docs),
            question: params.query,
            history: params.history,
            parameters: params.model,
        };
        let citations = format_citations(&docs, &params.knowledge_base_name);

        self.coordinator
            .generate(request, &params.prompt_template, citations, params.stream, out)
            .await
    }

    /// Runs in a background task. A failure arrives as a final `Err` item.
    pub fn spawn(self: Arc<Self>, params: ChatParams) -> RecordReceiver {
        let (tx, rx) = mpsc::channel(RECORD_BUFFER);
        tokio::spawn(async move {
            if let Err(err) = self.run(params, &tx).await {
                let _ = tx.send(Err(err)).await;
            }
        });
        rx
    }
}
