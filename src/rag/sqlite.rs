//! SQLite-backed knowledge base store.
//!
//! In-process vector store using SQLite for chunks and metadata and
//! brute-force cosine similarity for search.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::document::{Document, DocumentMetadata, RetrievedDocument};
use super::store::{score_threshold_process, Embedder, VectorStore};
use crate::core::config::AppPaths;
use crate::core::errors::ChatError;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteVectorStore {
    pub async fn new(paths: &AppPaths, embedder: Arc<dyn Embedder>) -> Result<Self, ChatError> {
        Self::with_path(paths.db_path.clone(), embedder).await
    }

    pub async fn with_path(db_path: PathBuf, embedder: Arc<dyn Embedder>) -> Result<Self, ChatError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ChatError::retrieval)?;

        let store = Self { pool, embedder };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ChatError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS knowledge_bases (
                name TEXT PRIMARY KEY,
                embed_model TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ChatError::retrieval)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kb_chunks (
                chunk_id TEXT PRIMARY KEY,
                kb_name TEXT NOT NULL REFERENCES knowledge_bases(name) ON DELETE CASCADE,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ChatError::retrieval)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_chunks_kb ON kb_chunks(kb_name)")
            .execute(&self.pool)
            .await
            .map_err(ChatError::retrieval)?;

        Ok(())
    }

    pub async fn create_knowledge_base(&self, kb_name: &str, embed_model: &str) -> Result<(), ChatError> {
        sqlx::query("INSERT OR IGNORE INTO knowledge_bases (name, embed_model) VALUES (?1, ?2)")
            .bind(kb_name)
            .bind(embed_model)
            .execute(&self.pool)
            .await
            .map_err(ChatError::retrieval)?;
        Ok(())
    }

    /// Removes a knowledge base and all its chunks. Returns whether it existed.
    pub async fn drop_knowledge_base(&self, kb_name: &str) -> Result<bool, ChatError> {
        let result = sqlx::query("DELETE FROM knowledge_bases WHERE name = ?1")
            .bind(kb_name)
            .execute(&self.pool)
            .await
            .map_err(ChatError::retrieval)?;
        Ok(result.rows_affected() > 0)
    }

    /// Embeds and stores documents, returning the generated chunk ids.
    pub async fn add_documents(&self, kb_name: &str, docs: &[Document]) -> Result<Vec<String>, ChatError> {
        if !self.knowledge_base_exists(kb_name).await? {
            return Err(ChatError::KnowledgeBaseNotFound(kb_name.to_string()));
        }
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != docs.len() {
            return Err(ChatError::Retrieval(format!(
                "embedder returned {} vectors for {} documents",
                embeddings.len(),
                docs.len()
            )));
        }

        let mut tx = self.pool.begin().await.map_err(ChatError::retrieval)?;
        let mut ids = Vec::with_capacity(docs.len());

        for (doc, embedding) in docs.iter().zip(embeddings.iter()) {
            let chunk_id = Uuid::new_v4().to_string();
            let metadata = serde_json::to_string(&doc.metadata).map_err(ChatError::retrieval)?;

            sqlx::query(
                "INSERT INTO kb_chunks (chunk_id, kb_name, content, source, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&chunk_id)
            .bind(kb_name)
            .bind(&doc.content)
            .bind(&doc.metadata.source)
            .bind(&metadata)
            .bind(serialize_embedding(embedding))
            .execute(&mut *tx)
            .await
            .map_err(ChatError::retrieval)?;

            ids.push(chunk_id);
        }

        tx.commit().await.map_err(ChatError::retrieval)?;
        tracing::info!(kb = kb_name, count = ids.len(), "Added documents to knowledge base");
        Ok(ids)
    }

    pub async fn delete_documents_by_source(&self, kb_name: &str, source: &str) -> Result<u64, ChatError> {
        let result = sqlx::query("DELETE FROM kb_chunks WHERE kb_name = ?1 AND source = ?2")
            .bind(kb_name)
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(ChatError::retrieval)?;
        Ok(result.rows_affected())
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow, score: f32) -> RetrievedDocument {
        let id: String = row.get("chunk_id");
        let metadata_str: String = row.get("metadata");
        let mut metadata = match serde_json::from_str::<DocumentMetadata>(&metadata_str) {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(chunk_id = %id, "Corrupt chunk metadata, using defaults: {}", err);
                DocumentMetadata::default()
            }
        };
        if metadata.source.is_empty() {
            metadata.source = row.get("source");
        }

        RetrievedDocument {
            id,
            content: row.get("content"),
            score,
            metadata,
        }
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Cosine similarity folded into a [0, 1] distance.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 1.0)
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn search(
        &self,
        kb_name: &str,
        query: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedDocument>, ChatError> {
        if !self.knowledge_base_exists(kb_name).await? {
            return Err(ChatError::KnowledgeBaseNotFound(kb_name.to_string()));
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Retrieval("embedder returned no vector for query".to_string()))?;

        let rows = sqlx::query(
            "SELECT chunk_id, content, source, metadata, embedding
             FROM kb_chunks
             WHERE kb_name = ?1",
        )
        .bind(kb_name)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::retrieval)?;

        let scored: Vec<RetrievedDocument> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row
                    .try_get::<Option<Vec<u8>>, _>("embedding")
                    .ok()
                    .flatten()?;
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = deserialize_embedding(&embedding_bytes);
                let score = cosine_distance(&query_embedding, &stored);
                Some(Self::row_to_document(row, score))
            })
            .collect();

        Ok(score_threshold_process(score_threshold, top_k, scored))
    }

    async fn knowledge_base_exists(&self, kb_name: &str) -> Result<bool, ChatError> {
        let row = sqlx::query("SELECT 1 FROM knowledge_bases WHERE name = ?1")
            .bind(kb_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(ChatError::retrieval)?;
        Ok(row.is_some())
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<String>, ChatError> {
        let rows = sqlx::query("SELECT name FROM knowledge_bases ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(ChatError::retrieval)?;
        Ok(rows.iter().map(|row| row.get("name")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::document::DocAnswer;

    /// Maps known words onto fixed axes so distances are predictable.
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
            Ok(inputs
                .iter()
                .map(|text| {
                    if text.contains("sky") {
                        vec![1.0, 0.0, 0.0]
                    } else if text.contains("sea") {
                        vec![0.8, 0.6, 0.0]
                    } else {
                        vec![0.0, 0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    async fn store(dir: &tempfile::TempDir) -> SqliteVectorStore {
        SqliteVectorStore::with_path(dir.path().join("kb.db"), Arc::new(AxisEmbedder))
            .await
            .unwrap()
    }

    fn doc(content: &str, source: &str) -> Document {
        Document::new(content, DocumentMetadata::from_source(source))
    }

    #[tokio::test]
    async fn search_orders_by_distance_and_applies_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.create_knowledge_base("samples", "test").await.unwrap();
        store
            .add_documents(
                "samples",
                &[
                    doc("the sea is deep", "/kb/sea.md"),
                    doc("the sky is blue", "/kb/sky.md"),
                    doc("numbers", "/kb/math.md"),
                ],
            )
            .await
            .unwrap();

        let hits = store.search("samples", "sky", 3, 0.5).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "the sky is blue");
        assert!(hits[0].score < 1e-6);
        assert_eq!(hits[1].content, "the sea is deep");
        assert!((hits[1].score - 0.2).abs() < 1e-5);
        assert_eq!(hits[1].metadata.source, "/kb/sea.md");
    }

    #[tokio::test]
    async fn search_respects_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.create_knowledge_base("samples", "test").await.unwrap();
        store
            .add_documents("samples", &[doc("sky one", "a"), doc("sky two", "b")])
            .await
            .unwrap();

        let hits = store.search("samples", "sky", 1, 1.0).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn unknown_knowledge_base_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let err = store.search("missing", "sky", 3, 1.0).await.unwrap_err();
        assert_eq!(err, ChatError::KnowledgeBaseNotFound("missing".to_string()));

        let err = store.add_documents("missing", &[doc("x", "y")]).await.unwrap_err();
        assert!(matches!(err, ChatError::KnowledgeBaseNotFound(_)));
    }

    #[tokio::test]
    async fn doc_answer_survives_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.create_knowledge_base("faq", "test").await.unwrap();
        let mut metadata = DocumentMetadata::from_source("/kb/faq.txt").with_field("doc_category", "FAQ");
        metadata.doc_answer = Some(DocAnswer {
            page_content: "Look up.".to_string(),
        });
        store
            .add_documents("faq", &[Document::new("where is the sky?", metadata)])
            .await
            .unwrap();

        let hits = store.search("faq", "sky", 1, 1.0).await.unwrap();

        assert_eq!(hits[0].grounding_text(), "Look up.");
        assert_eq!(hits[0].metadata.extra["doc_category"], "FAQ");
    }

    #[tokio::test]
    async fn knowledge_base_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.create_knowledge_base("b", "test").await.unwrap();
        store.create_knowledge_base("a", "test").await.unwrap();
        store.create_knowledge_base("a", "test").await.unwrap();

        assert_eq!(store.list_knowledge_bases().await.unwrap(), vec!["a", "b"]);

        store
            .add_documents("a", &[doc("sky", "one.md"), doc("sea", "two.md")])
            .await
            .unwrap();
        assert_eq!(store.delete_documents_by_source("a", "one.md").await.unwrap(), 1);

        assert!(store.drop_knowledge_base("a").await.unwrap());
        assert!(!store.knowledge_base_exists("a").await.unwrap());
        assert!(!store.drop_knowledge_base("a").await.unwrap());
    }

    #[test]
    fn distance_is_bounded() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]), 0.0);
        assert_eq!(cosine_distance(&[], &[]), 1.0);
    }

    #[tokio::test]
    async fn corrupt_metadata_falls_back_to_the_source_column() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.create_knowledge_base("samples", "test").await.unwrap();
        let ids = store
            .add_documents("samples", &[doc("the sky is blue", "/kb/sky.md")])
            .await
            .unwrap();
        sqlx::query("UPDATE kb_chunks SET metadata = 'not json' WHERE chunk_id = ?1")
            .bind(&ids[0])
            .execute(&store.pool)
            .await
            .unwrap();

        let results = store.search("samples", "sky", 3, 1.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ids[0]);
        assert_eq!(results[0].metadata.source, "/kb/sky.md");
        assert!(results[0].metadata.doc_answer.is_none());
    }
}
