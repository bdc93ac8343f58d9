pub mod engine;
pub mod openai_compat;
pub mod provider;
pub mod types;

pub use engine::{GenerationEngine, LlmGenerationEngine, StreamEvent};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::LlmProvider;
pub use types::{ChatMessage, ChatRequest, GenerationRequest, ModelParameters, Role};
