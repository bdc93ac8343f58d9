use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::{dump, FaqLoader, VectorStore};
use crate::state::AppState;

pub async fn list_knowledge_bases(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let names = state.store.list_knowledge_bases().await?;
    Ok(Json(json!({ "data": names })))
}

#[derive(Debug, Deserialize)]
pub struct DownloadDocQuery {
    pub knowledge_base_name: String,
    pub file_name: String,
    #[serde(default)]
    pub preview: bool,
}

/// Serves an original knowledge base file, the target of citation links.
pub async fn download_doc(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadDocQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let kb_name = sanitize_file_name(&query.knowledge_base_name)
        .ok_or_else(|| ApiError::BadRequest("Invalid knowledge base name".to_string()))?;
    let file_name = sanitize_file_name(&query.file_name)
        .ok_or_else(|| ApiError::BadRequest("Invalid file name".to_string()))?;

    if !state.store.knowledge_base_exists(kb_name).await? {
        return Err(ApiError::NotFound(format!(
            "Knowledge base not found: {}",
            kb_name
        )));
    }

    let path = state.paths.kb_content_dir(kb_name).join(file_name);
    if !path.is_file() {
        return Err(ApiError::NotFound(format!("File not found: {}", file_name)));
    }
    let bytes = tokio::fs::read(&path).await.map_err(ApiError::internal)?;

    let disposition = format!(
        "{}; filename*=UTF-8''{}",
        if query.preview { "inline" } else { "attachment" },
        urlencoding::encode(file_name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(file_name).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ImportFaqRequest {
    pub knowledge_base_name: String,
    pub file_name: String,
}

/// Loads a FAQ file from the knowledge base's content folder into the store,
/// replacing chunks previously imported from the same file.
pub async fn import_faq(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ImportFaqRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kb_name = sanitize_file_name(&body.knowledge_base_name)
        .ok_or_else(|| ApiError::BadRequest("Invalid knowledge base name".to_string()))?;
    let file_name = sanitize_file_name(&body.file_name)
        .ok_or_else(|| ApiError::BadRequest("Invalid file name".to_string()))?;

    let path = state.paths.kb_content_dir(kb_name).join(file_name);
    if !path.is_file() {
        return Err(ApiError::NotFound(format!("File not found: {}", file_name)));
    }

    let docs = FaqLoader::new(&path)
        .load()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if state.settings.kb.dump_retrieved_docs {
        if let Err(err) = dump::save_split_documents(
            &docs,
            kb_name,
            file_name,
            "split",
            &state.paths.split_documents_dir,
        )
        .await
        {
            tracing::warn!("Failed to dump split documents: {}", err);
        }
    }

    state
        .store
        .create_knowledge_base(kb_name, &state.settings.llm.embedding_model)
        .await?;
    let source = path.to_string_lossy().to_string();
    let removed = state.store.delete_documents_by_source(kb_name, &source).await?;
    let ids = state.store.add_documents(kb_name, &docs).await?;

    tracing::info!(
        kb = kb_name,
        file = file_name,
        added = ids.len(),
        removed,
        "Imported FAQ file"
    );
    Ok(Json(json!({
        "knowledge_base_name": kb_name,
        "file_name": file_name,
        "count": ids.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteKnowledgeBaseRequest {
    pub knowledge_base_name: String,
}

/// Drops a knowledge base with its chunks and its folder on disk.
pub async fn delete_knowledge_base(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteKnowledgeBaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kb_name = sanitize_file_name(&body.knowledge_base_name)
        .ok_or_else(|| ApiError::BadRequest("Invalid knowledge base name".to_string()))?;

    if !state.store.drop_knowledge_base(kb_name).await? {
        return Err(ApiError::NotFound(format!(
            "Knowledge base not found: {}",
            kb_name
        )));
    }

    let kb_dir = state.paths.knowledge_base_dir.join(kb_name);
    if kb_dir.is_dir() {
        if let Err(err) = tokio::fs::remove_dir_all(&kb_dir).await {
            tracing::warn!(kb = kb_name, "Failed to remove knowledge base folder: {}", err);
        }
    }

    tracing::info!(kb = kb_name, "Deleted knowledge base");
    Ok(Json(json!({ "knowledge_base_name": kb_name })))
}

/// Accepts a bare file name only; rejects separators and `..`.
fn sanitize_file_name(name: &str) -> Option<&str> {
    let base = std::path::Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())?;
    if base == name && !name.contains("..") && !name.contains('\\') {
        Some(base)
    } else {
        None
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("txt") | Some("md") => "text/plain; charset=utf-8",
        Some("pdf") => "application/pdf",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("json") => "application/json",
        Some("csv") => "text/csv; charset=utf-8",
        _ => "application/octet-stream",
    }
}
