use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use serde::Deserialize;

use crate::chat::{error_payload, ChatParams, RecordReceiver, ResponseRecord};
use crate::core::config::AppConfig;
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ModelParameters};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct KnowledgeBaseChatRequest {
    pub query: String,
    pub knowledge_base_name: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub prompt_name: Option<String>,
}

impl KnowledgeBaseChatRequest {
    /// Validates the body and fills unset fields from configuration.
    pub fn into_params(self, settings: &AppConfig) -> Result<ChatParams, ApiError> {
        if self.query.trim().is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".to_string()));
        }
        if self.knowledge_base_name.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "knowledge_base_name must not be empty".to_string(),
            ));
        }

        let top_k = self.top_k.unwrap_or(settings.kb.top_k);
        if top_k == 0 {
            return Err(ApiError::BadRequest("top_k must be at least 1".to_string()));
        }
        let score_threshold = self.score_threshold.unwrap_or(settings.kb.score_threshold);
        if !(0.0..=1.0).contains(&score_threshold) {
            return Err(ApiError::BadRequest(
                "score_threshold must be between 0 and 1".to_string(),
            ));
        }
        let temperature = self.temperature.unwrap_or(settings.kb.temperature);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ApiError::BadRequest(
                "temperature must be between 0 and 1".to_string(),
            ));
        }

        let prompt_name = self.prompt_name.unwrap_or_else(|| "default".to_string());
        let prompt_template = settings
            .prompts
            .knowledge_base_chat_template(&prompt_name)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown prompt_name: {}", prompt_name)))?;

        Ok(ChatParams {
            query: self.query,
            knowledge_base_name: self.knowledge_base_name,
            top_k,
            score_threshold,
            history: self.history,
            stream: self.stream,
            model: ModelParameters {
                name: self.model_name.unwrap_or_else(|| settings.llm.model.clone()),
                temperature,
                max_tokens: self.max_tokens.or(settings.kb.max_tokens),
            },
            prompt_template,
        })
    }
}

pub async fn knowledge_base_chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<KnowledgeBaseChatRequest>,
) -> Result<Response, ApiError> {
    let params = body.into_params(&state.settings)?;
    state
        .chat
        .ensure_knowledge_base(&params.knowledge_base_name)
        .await?;

    tracing::info!(
        kb = %params.knowledge_base_name,
        stream = params.stream,
        top_k = params.top_k,
        "Knowledge base chat"
    );

    let streaming = params.stream;
    let records = state.chat.clone().spawn(params);

    if streaming {
        Ok(Sse::new(record_events(records))
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let record = terminal_record(records).await?;
        Ok(Json(record).into_response())
    }
}

/// One `data:` event per record; a failure ends the stream with an `error` event.
fn record_events(records: RecordReceiver) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(records), |records| async move {
        let mut records = records?;
        match records.recv().await? {
            Ok(record) => Some((Ok(Event::default().data(record.to_json())), Some(records))),
            Err(err) => {
                tracing::warn!("Knowledge base chat stream failed: {}", err);
                let event = Event::default().event("error").data(error_payload(&err));
                Some((Ok(event), None))
            }
        }
    })
}

/// Waits for the record that closes a non-streaming response.
async fn terminal_record(mut records: RecordReceiver) -> Result<ResponseRecord, ApiError> {
    while let Some(item) = records.recv().await {
        let record = item?;
        if record.is_terminal() {
            return Ok(record);
        }
    }
    Err(ApiError::Internal(
        "chat ended without a response".to_string(),
    ))
}
