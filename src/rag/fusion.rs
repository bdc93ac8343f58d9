//! Multi-query retrieval support: query reformulation and reciprocal rank fusion.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::document::RetrievedDocument;
use crate::core::errors::ChatError;
use crate::llm::{ChatMessage, ChatRequest, LlmProvider, ModelParameters};

/// Default RRF damping constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

#[async_trait]
pub trait QueryReformulator: Send + Sync {
    /// Returns the queries to search with. The original query comes first.
    async fn reformulate(&self, query: &str, count: usize) -> Result<Vec<String>, ChatError>;
}

/// Asks the chat model for paraphrases of the user query.
pub struct LlmQueryReformulator {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmQueryReformulator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

fn reformulation_prompt(query: &str, count: usize) -> String {
    format!(
        "You are a helpful assistant that generates multiple search queries based on a single input query.\n\
         Generate {count} search queries related to: {query}\n\
         Write one query per line and nothing else."
    )
}

/// Turns a model reply into a query list, original first, no blanks or repeats.
pub(crate) fn parse_reformulations(query: &str, reply: &str, count: usize) -> Vec<String> {
    let mut queries = vec![query.to_string()];
    for line in reply.lines() {
        let cleaned = strip_list_marker(line.trim());
        if cleaned.is_empty() || queries.iter().any(|q| q == cleaned) {
            continue;
        }
        queries.push(cleaned.to_string());
        if queries.len() > count {
            break;
        }
    }
    queries
}

/// Drops a leading `1.`, `2)`, `3、`, `-`, `*` or `•` marker.
fn strip_list_marker(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        return rest.trim();
    }
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')', '、']) {
            return rest.trim();
        }
    }
    line
}

#[async_trait]
impl QueryReformulator for LlmQueryReformulator {
    async fn reformulate(&self, query: &str, count: usize) -> Result<Vec<String>, ChatError> {
        let request = ChatRequest::new(
            vec![ChatMessage::user(reformulation_prompt(query, count))],
            ModelParameters {
                name: self.model.clone(),
                temperature: 0.0,
                max_tokens: None,
            },
        );
        let reply = self
            .provider
            .chat(&request)
            .await
            .map_err(|e| ChatError::FusionReformulation(e.to_string()))?;
        Ok(parse_reformulations(query, &reply, count))
    }
}

/// Merges ranked lists with reciprocal rank fusion.
///
/// A document at 1-based rank `r` in a list contributes `1 / (r + k)`; a
/// document found in several lists sums its contributions. Documents are
/// identified by `(source, id)`. The merged list is ordered by fused score,
/// ties broken by first appearance, and truncated to `top_k`. Each kept
/// document retains its best (lowest) original distance as `score`.
pub fn reciprocal_rank_fusion(
    lists: Vec<Vec<RetrievedDocument>>,
    k: f32,
    top_k: usize,
) -> Vec<RetrievedDocument> {
    let mut positions: HashMap<(String, String), usize> = HashMap::new();
    let mut fused: Vec<(RetrievedDocument, f32)> = Vec::new();

    for list in lists {
        for (idx, doc) in list.into_iter().enumerate() {
            let contribution = 1.0 / ((idx + 1) as f32 + k);
            let key = (doc.metadata.source.clone(), doc.id.clone());
            match positions.get(&key) {
                Some(&pos) => {
                    let (existing, score) = &mut fused[pos];
                    *score += contribution;
                    if doc.score < existing.score {
                        existing.score = doc.score;
                    }
                }
                None => {
                    positions.insert(key, fused.len());
                    fused.push((doc, contribution));
                }
            }
        }
    }

    // Stable sort keeps first-appearance order among equal scores.
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.into_iter().take(top_k).map(|(doc, _)| doc).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::document::DocumentMetadata;

    fn hit(name: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument {
            id: name.to_string(),
            content: name.to_string(),
            score,
            metadata: DocumentMetadata::from_source(format!("{name}.md")),
        }
    }

    fn ids(docs: &[RetrievedDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn document_in_both_lists_ranks_first() {
        let a = vec![hit("docX", 0.1), hit("docY", 0.3)];
        let b = vec![hit("docY", 0.2), hit("docZ", 0.4)];

        let merged = reciprocal_rank_fusion(vec![a, b], DEFAULT_RRF_K, 3);

        assert_eq!(ids(&merged), vec!["docY", "docX", "docZ"]);
        assert!((merged[0].score - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn merged_list_is_truncated() {
        let a = vec![hit("a", 0.1), hit("b", 0.2), hit("c", 0.3)];
        let merged = reciprocal_rank_fusion(vec![a], DEFAULT_RRF_K, 2);
        assert_eq!(ids(&merged), vec!["a", "b"]);
    }

    #[test]
    fn same_id_from_different_sources_is_distinct() {
        let mut other = hit("a", 0.1);
        other.metadata.source = "elsewhere.md".to_string();

        let merged = reciprocal_rank_fusion(vec![vec![hit("a", 0.1)], vec![other]], DEFAULT_RRF_K, 5);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn reformulations_are_cleaned() {
        let reply = "1. what is rust\n\n2) rust language overview\n- 你好\n* what is rust\n   \n";
        let queries = parse_reformulations("rust?", reply, 5);
        assert_eq!(
            queries,
            vec!["rust?", "what is rust", "rust language overview", "你好"]
        );
    }

    #[test]
    fn leading_numbers_without_marker_are_kept() {
        assert_eq!(strip_list_marker("3D printing"), "3D printing");
        assert_eq!(strip_list_marker("3、三维打印"), "三维打印");
    }

    #[test]
    fn reformulations_are_capped() {
        let queries = parse_reformulations("q", "a\nb\nc\nd", 2);
        assert_eq!(queries, vec!["q", "a", "b"]);
    }
}
