//! Document types flowing through retrieval.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pre-written answer attached to a question-style entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocAnswer {
    pub page_content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path of the file the document was loaded from.
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_answer: Option<DocAnswer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// An unscored document, as produced by loaders and accepted by stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// A search hit. `score` is a distance: lower is more relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub content: String,
    pub score: f32,
    pub metadata: DocumentMetadata,
}

impl RetrievedDocument {
    /// Text used to ground the model: the attached answer when present.
    pub fn grounding_text(&self) -> &str {
        match &self.metadata.doc_answer {
            Some(answer) => &answer.page_content,
            None => &self.content,
        }
    }

    /// Basename of the source path, accepting both separator styles.
    pub fn file_name(&self) -> &str {
        let source = self.metadata.source.as_str();
        source
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(source)
    }

    /// Key used to recognise the same chunk across several result lists.
    pub fn identity(&self) -> (&str, &str) {
        (&self.metadata.source, &self.id)
    }
}

impl std::fmt::Display for RetrievedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "page_content='{}' score={:.4} source='{}'",
            self.content, self.score, self.metadata.source
        )
    }
}
