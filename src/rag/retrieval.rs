//! Retrieval dispatch: single-query search or multi-query fusion.

use std::sync::Arc;

use futures_util::future::try_join_all;

use super::document::RetrievedDocument;
use super::fusion::{reciprocal_rank_fusion, QueryReformulator};
use super::store::VectorStore;
use crate::core::config::FusionSettings;
use crate::core::errors::ChatError;

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    fusion: Option<FusionMode>,
}

struct FusionMode {
    reformulator: Arc<dyn QueryReformulator>,
    settings: FusionSettings,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            fusion: None,
        }
    }

    /// Enables fusion search with the given reformulator.
    pub fn with_fusion(mut self, reformulator: Arc<dyn QueryReformulator>, settings: FusionSettings) -> Self {
        self.fusion = Some(FusionMode {
            reformulator,
            settings,
        });
        self
    }

    pub async fn knowledge_base_exists(&self, kb_name: &str) -> Result<bool, ChatError> {
        self.store.knowledge_base_exists(kb_name).await
    }

    pub async fn retrieve(
        &self,
        query: &str,
        kb_name: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedDocument>, ChatError> {
        let docs = match &self.fusion {
            Some(fusion) => self.fusion_search(fusion, query, kb_name, top_k, score_threshold).await?,
            None => self.store.search(kb_name, query, top_k, score_threshold).await?,
        };
        tracing::info!(kb = kb_name, doc_count = docs.len(), "search_docs count");
        Ok(docs)
    }

    async fn fusion_search(
        &self,
        fusion: &FusionMode,
        query: &str,
        kb_name: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedDocument>, ChatError> {
        let queries = match fusion
            .reformulator
            .reformulate(query, fusion.settings.query_count)
            .await
        {
            Ok(queries) if !queries.is_empty() => queries,
            Ok(_) => vec![query.to_string()],
            Err(err) => {
                tracing::warn!(kb = kb_name, "Query reformulation failed, using single query: {}", err);
                return self.store.search(kb_name, query, top_k, score_threshold).await;
            }
        };
        tracing::debug!(kb = kb_name, queries = queries.len(), "Fusion search");

        let lists = try_join_all(
            queries
                .iter()
                .map(|q| self.store.search(kb_name, q, top_k, score_threshold)),
        )
        .await?;

        Ok(reciprocal_rank_fusion(lists, fusion.settings.rrf_k, top_k))
    }
}
