use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::VectorStore;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let knowledge_bases = state.store.list_knowledge_bases().await?.len();
    Ok(Json(json!({
        "status": "ok",
        "knowledge_bases": knowledge_bases,
        "fusion_search_enabled": state.settings.kb.fusion_search_enabled,
    })))
}
