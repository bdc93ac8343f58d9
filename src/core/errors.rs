use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Failures of the retrieval-and-answer pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChatError {
    #[error("Knowledge base not found: {0}")]
    KnowledgeBaseNotFound(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("query reformulation failed: {0}")]
    FusionReformulation(String),
}

impl ChatError {
    pub fn retrieval<E: std::fmt::Display>(err: E) -> Self {
        ChatError::Retrieval(err.to_string())
    }

    pub fn generation<E: std::fmt::Display>(err: E) -> Self {
        ChatError::Generation(err.to_string())
    }
}

/// Errors raised by an LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Parse(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config at '{path}': {message}")]
    Invalid { path: String, message: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::KnowledgeBaseNotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
