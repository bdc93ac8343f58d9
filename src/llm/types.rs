use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of conversation, either caller-supplied history or a built prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    pub name: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// What the pipeline hands to generation: grounding, question and history.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub grounding_context: String,
    pub question: String,
    pub history: Vec<ChatMessage>,
    pub parameters: ModelParameters,
}

/// Fully rendered prompt sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub parameters: ModelParameters,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, parameters: ModelParameters) -> Self {
        Self {
            messages,
            parameters,
        }
    }
}
