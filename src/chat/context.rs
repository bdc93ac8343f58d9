use crate::rag::RetrievedDocument;

/// Grounding text for the prompt: one document per line, in retrieval order.
///
/// A document carrying a `doc_answer` contributes that answer instead of its
/// own content.
pub fn build_context(docs: &[RetrievedDocument]) -> String {
    docs.iter()
        .map(RetrievedDocument::grounding_text)
        .collect::<Vec<_>>()
        .join("\n")
}
