//! Typed view over the merged YAML configuration.
//!
//! Every field carries a serde default so a missing or partial `config.yml`
//! still yields a usable service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NO_MATCH_ANSWER: &str = "未找到匹配答案";

const DEFAULT_KB_CHAT_PROMPT: &str = "<指令>根据已知信息，简洁和专业的来回答问题。如果无法从中得到答案，请说 “根据已知信息无法回答该问题”，不允许在答案中添加编造成分，答案请使用中文。 </指令>\n<已知信息>{{ context }}</已知信息>\n<问题>{{ question }}</问题>\n";

const EMPTY_KB_CHAT_PROMPT: &str = "请你回答我的问题:\n{{ question }}\n\n";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub llm: LlmSettings,
    pub kb: KbSettings,
    pub prompts: PromptSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7861,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:1234".to_string(),
            api_key: None,
            model: "chatglm3-6b".to_string(),
            embedding_model: "bge-large-zh".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KbSettings {
    pub top_k: usize,
    pub score_threshold: f32,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub no_match_fallback_enabled: bool,
    pub no_match_fallback_text: String,
    pub fusion_search_enabled: bool,
    pub fusion: FusionSettings,
    pub dump_retrieved_docs: bool,
}

impl Default for KbSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            score_threshold: 1.0,
            temperature: 0.7,
            max_tokens: None,
            no_match_fallback_enabled: false,
            no_match_fallback_text: DEFAULT_NO_MATCH_ANSWER.to_string(),
            fusion_search_enabled: false,
            fusion: FusionSettings::default(),
            dump_retrieved_docs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// Rank offset `k` in `1 / (rank + k)`.
    pub rrf_k: f32,
    /// Number of reformulated queries requested from the model.
    pub query_count: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            query_count: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    pub knowledge_base_chat: HashMap<String, String>,
}

impl PromptSettings {
    /// Looks up a knowledge-base chat template, falling back to the built-ins.
    pub fn knowledge_base_chat_template(&self, name: &str) -> Option<String> {
        if let Some(template) = self.knowledge_base_chat.get(name) {
            return Some(template.clone());
        }
        match name {
            "default" => Some(DEFAULT_KB_CHAT_PROMPT.to_string()),
            "empty" => Some(EMPTY_KB_CHAT_PROMPT.to_string()),
            _ => None,
        }
    }
}
