//! Loader for FAQ text files.
//!
//! Entries are separated by `=====`. The first line of an entry is the
//! question, the remaining lines are the answer:
//!
//! ```text
//! Question: How do I reset my password?
//! Answer: Use the "forgot password" link.
//! =====
//! Question: ...
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::document::{DocAnswer, Document, DocumentMetadata};

pub const QA_SEPARATOR: &str = "=====";

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Error loading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error loading {path}: entry {index} has no answer")]
    MissingAnswer { path: PathBuf, index: usize },
}

pub struct FaqLoader {
    path: PathBuf,
    separator: String,
}

impl FaqLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            separator: QA_SEPARATOR.to_string(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub async fn load(&self) -> Result<Vec<Document>, LoaderError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| LoaderError::Read {
                path: self.path.clone(),
                source,
            })?;
        let docs = parse_faq(&text, &self.separator, &self.path)?;
        tracing::debug!(path = %self.path.display(), count = docs.len(), "Loaded FAQ documents");
        Ok(docs)
    }
}

/// Produces a question and an answer document per entry, in file order.
pub fn parse_faq(text: &str, separator: &str, path: &Path) -> Result<Vec<Document>, LoaderError> {
    let source = path.to_string_lossy().to_string();
    let mut docs = Vec::new();

    for (index, entry) in text.split(separator).enumerate() {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((question, answer)) = entry.split_once('\n') else {
            return Err(LoaderError::MissingAnswer {
                path: path.to_path_buf(),
                index,
            });
        };
        let question = question.trim().replace("Question: ", "");
        let answer = answer.trim().replace("Answer: ", "");

        let base = DocumentMetadata::from_source(source.clone()).with_field("doc_category", "FAQ");

        let mut question_meta = base.clone().with_field("doc_sub_category", "Question");
        question_meta.doc_answer = Some(DocAnswer {
            page_content: answer.clone(),
        });
        docs.push(Document::new(question, question_meta));
        docs.push(Document::new(answer, base.with_field("doc_sub_category", "Answer")));
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Question: 门派有哪些?\nAnswer: 少林、逍遥、天龙。\n=====\nQuestion: How to level up?\nAnswer: Finish quests.\nKill monsters.\n=====\n";

    #[test]
    fn entries_become_question_and_answer_documents() {
        let docs = parse_faq(SAMPLE, QA_SEPARATOR, Path::new("/kb/faq.txt")).unwrap();

        assert_eq!(docs.len(), 4);
        assert_eq!(docs[0].content, "门派有哪些?");
        assert_eq!(docs[0].metadata.extra["doc_sub_category"], "Question");
        assert_eq!(
            docs[0].metadata.doc_answer.as_ref().unwrap().page_content,
            "少林、逍遥、天龙。"
        );
        assert_eq!(docs[1].content, "少林、逍遥、天龙。");
        assert_eq!(docs[1].metadata.extra["doc_sub_category"], "Answer");
        assert!(docs[1].metadata.doc_answer.is_none());
        assert_eq!(docs[3].content, "Finish quests.\nKill monsters.");
        assert!(docs.iter().all(|d| d.metadata.source == "/kb/faq.txt"));
        assert!(docs.iter().all(|d| d.metadata.extra["doc_category"] == "FAQ"));
    }

    #[test]
    fn entry_without_answer_is_rejected() {
        let err = parse_faq("Q: a\nA: b\n=====\nonly a question", QA_SEPARATOR, Path::new("f.txt"))
            .unwrap_err();
        assert!(matches!(err, LoaderError::MissingAnswer { index: 1, .. }));
    }

    #[tokio::test]
    async fn load_reads_file_and_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faq.txt");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let docs = FaqLoader::new(&path).load().await.unwrap();
        assert_eq!(docs.len(), 4);

        let missing = dir.path().join("absent.txt");
        let err = FaqLoader::new(&missing).load().await.unwrap_err();
        assert!(err.to_string().contains("absent.txt"));
    }

    #[test]
    fn custom_separator() {
        let loader = FaqLoader::new("x").with_separator("---");
        let docs = parse_faq("q1\na1\n---\nq2\na2", &loader.separator, Path::new("x")).unwrap();
        assert_eq!(docs.len(), 4);
    }
}
