//! Output records of a knowledge base chat.
//!
//! Streaming callers receive `{"answer": token}` records followed by one
//! `{"docs": [...]}` terminator. Non-streaming callers receive a single
//! `{"answer": ..., "docs": [...]}` record.

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::core::errors::ChatError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseRecord {
    Complete { answer: String, docs: Vec<String> },
    Answer { answer: String },
    Docs { docs: Vec<String> },
}

/// Channel the pipeline writes records to. A trailing `Err` ends a failed run.
pub type RecordSender = mpsc::Sender<Result<ResponseRecord, ChatError>>;
pub type RecordReceiver = mpsc::Receiver<Result<ResponseRecord, ChatError>>;

impl ResponseRecord {
    pub fn answer(answer: impl Into<String>) -> Self {
        Self::Answer {
            answer: answer.into(),
        }
    }

    pub fn docs(docs: Vec<String>) -> Self {
        Self::Docs { docs }
    }

    pub fn complete(answer: impl Into<String>, docs: Vec<String>) -> Self {
        Self::Complete {
            answer: answer.into(),
            docs,
        }
    }

    /// Whether this record closes a successful response.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Answer { .. })
    }

    /// JSON text with non-ASCII characters kept as-is.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Records for a fixed answer with no citations.
pub fn short_circuit_records(answer: &str, streaming: bool) -> Vec<ResponseRecord> {
    if streaming {
        vec![ResponseRecord::answer(answer), ResponseRecord::docs(Vec::new())]
    } else {
        vec![ResponseRecord::complete(answer, Vec::new())]
    }
}

/// Body of the error event that ends a failed stream.
pub fn error_payload(err: &ChatError) -> String {
    json!({ "error": err.to_string() }).to_string()
}
