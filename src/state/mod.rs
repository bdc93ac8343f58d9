use std::sync::Arc;

use crate::chat::{KnowledgeBaseChat, NoMatchPolicy};
use crate::core::config::{AppConfig, AppPaths, ConfigService};
use crate::llm::{GenerationEngine, LlmGenerationEngine, LlmProvider, OpenAiCompatProvider};
use crate::rag::{
    LlmQueryReformulator, ProviderEmbedder, QueryReformulator, Retriever, SqliteVectorStore,
};

pub mod error;

use error::InitializationError;

/// Shared application state handed to every route.
///
/// Holds:
/// - Paths and the settings loaded at startup
/// - The SQLite knowledge base store
/// - The knowledge base chat pipeline
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Arc<AppConfig>,
    pub store: Arc<SqliteVectorStore>,
    pub chat: Arc<KnowledgeBaseChat>,
}

impl AppState {
    /// Loads configuration, opens the store and wires the chat pipeline to
    /// the configured LLM endpoint. Nothing contacts the endpoint here.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config.load_settings()?;

        let provider: Arc<dyn LlmProvider> =
            Arc::new(OpenAiCompatProvider::from_settings(&settings.llm));
        let embedder = Arc::new(ProviderEmbedder::new(
            provider.clone(),
            settings.llm.embedding_model.clone(),
        ));
        let store = Arc::new(
            SqliteVectorStore::new(paths.as_ref(), embedder)
                .await
                .map_err(|e| InitializationError::Store(e.into()))?,
        );

        let engine = Arc::new(LlmGenerationEngine::new(provider.clone()));
        let reformulator = Arc::new(LlmQueryReformulator::new(
            provider,
            settings.llm.model.clone(),
        ));

        Ok(Arc::new(Self::assemble(
            paths,
            settings,
            store,
            engine,
            reformulator,
        )))
    }

    /// Builds the state from already constructed collaborators.
    pub fn assemble(
        paths: Arc<AppPaths>,
        settings: AppConfig,
        store: Arc<SqliteVectorStore>,
        engine: Arc<dyn GenerationEngine>,
        reformulator: Arc<dyn QueryReformulator>,
    ) -> Self {
        let mut retriever = Retriever::new(store.clone());
        if settings.kb.fusion_search_enabled {
            retriever = retriever.with_fusion(reformulator, settings.kb.fusion.clone());
        }

        let mut chat = KnowledgeBaseChat::new(
            retriever,
            engine,
            NoMatchPolicy::from_settings(&settings.kb),
        );
        if settings.kb.dump_retrieved_docs {
            chat = chat.with_dump_dir(paths.split_documents_dir.clone());
        }

        tracing::info!(
            fusion = settings.kb.fusion_search_enabled,
            no_match_fallback = settings.kb.no_match_fallback_enabled,
            "Knowledge base chat ready"
        );

        AppState {
            paths,
            settings: Arc::new(settings),
            store,
            chat: Arc::new(chat),
        }
    }
}
