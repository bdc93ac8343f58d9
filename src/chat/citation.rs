//! Numbered source citations with download links.

use crate::rag::RetrievedDocument;

pub const DOWNLOAD_ROUTE: &str = "/knowledge_base/download_doc";

/// Link to the original file behind a citation.
pub fn download_url(kb_name: &str, file_name: &str) -> String {
    format!(
        "{}?knowledge_base_name={}&file_name={}",
        DOWNLOAD_ROUTE,
        urlencoding::encode(kb_name),
        urlencoding::encode(file_name)
    )
}

/// One citation per document, numbered from 1 in retrieval order.
///
/// Citations always show the document's own content, even when the
/// grounding context used its attached answer instead.
pub fn format_citations(docs: &[RetrievedDocument], kb_name: &str) -> Vec<String> {
    docs.iter()
        .enumerate()
        .map(|(idx, doc)| {
            let file_name = doc.file_name();
            format!(
                "出处 [{}] [{}]({}) \n\n{}\n\n",
                idx + 1,
                file_name,
                download_url(kb_name, file_name),
                doc.content
            )
        })
        .collect()
}
