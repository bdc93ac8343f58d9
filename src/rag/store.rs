//! Search capability the chat pipeline depends on.
//!
//! `SqliteVectorStore` is the production implementation.

use std::sync::Arc;

use async_trait::async_trait;

use super::document::RetrievedDocument;
use crate::core::errors::ChatError;
use crate::llm::LlmProvider;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Search a knowledge base.
    ///
    /// Returns at most `top_k` documents whose score is within
    /// `score_threshold`, best (lowest score) first. Fails with
    /// `KnowledgeBaseNotFound` when `kb_name` does not exist.
    async fn search(
        &self,
        kb_name: &str,
        query: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedDocument>, ChatError>;

    async fn knowledge_base_exists(&self, kb_name: &str) -> Result<bool, ChatError>;

    async fn list_knowledge_bases(&self) -> Result<Vec<String>, ChatError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ChatError>;
}

/// Embeds through the configured LLM provider's embeddings endpoint.
pub struct ProviderEmbedder {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
        self.provider
            .embed(inputs, &self.model)
            .await
            .map_err(ChatError::retrieval)
    }
}

/// Keeps hits with `score <= score_threshold`, best first, at most `top_k`.
pub fn score_threshold_process(
    score_threshold: f32,
    top_k: usize,
    mut docs: Vec<RetrievedDocument>,
) -> Vec<RetrievedDocument> {
    docs.retain(|doc| doc.score <= score_threshold);
    docs.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    docs.truncate(top_k);
    docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::document::DocumentMetadata;

    fn hit(id: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument {
            id: id.to_string(),
            content: id.to_string(),
            score,
            metadata: DocumentMetadata::from_source("s.txt"),
        }
    }

    #[test]
    fn threshold_filters_sorts_and_truncates() {
        let docs = vec![hit("c", 0.45), hit("x", 0.8), hit("a", 0.2), hit("b", 0.3)];

        let kept = score_threshold_process(0.5, 2, docs);

        let ids: Vec<&str> = kept.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn threshold_of_one_keeps_everything_in_range() {
        let kept = score_threshold_process(1.0, 10, vec![hit("a", 1.0), hit("b", 0.0)]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id, "b");
    }
}
