//! Writes document sets to text files for offline inspection.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Local;

use super::document::{Document, RetrievedDocument};

/// Longest name part, in characters, taken from a document name or query.
const MAX_NAME_CHARS: usize = 48;

fn dump_file_name(kb_name: &str, doc_name: &str, tag: &str) -> String {
    let stem = name_part(doc_name);
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{kb_name}_{stem}_{tag}_{timestamp}.txt")
}

/// Turns a file name or a free-form query into one safe path component.
fn name_part(doc_name: &str) -> String {
    let flattened: String = doc_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let stem = match flattened.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => flattened.as_str(),
    };
    let stem: String = stem.trim().chars().take(MAX_NAME_CHARS).collect();
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem
    }
}

fn render(items: impl ExactSizeIterator<Item = String>) -> String {
    let mut out = String::new();
    let _ = write!(out, "total items:{}\n\n", items.len());
    for (i, item) in items.enumerate() {
        let _ = writeln!(out, "------------ item: {}", i + 1);
        out.push_str(&item);
        out.push('\n');
    }
    out
}

async fn write_dump(dir: &Path, file_name: String, body: String) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

/// Dumps search hits, one rendered hit (content, score, source) per item.
pub async fn save_documents(
    docs: &[RetrievedDocument],
    kb_name: &str,
    doc_name: &str,
    tag: &str,
    dir: &Path,
) -> std::io::Result<PathBuf> {
    let body = render(docs.iter().map(|doc| doc.to_string()));
    write_dump(dir, dump_file_name(kb_name, doc_name, tag), body).await
}

/// Dumps loaded or split documents, content only.
pub async fn save_split_documents(
    docs: &[Document],
    kb_name: &str,
    doc_name: &str,
    tag: &str,
    dir: &Path,
) -> std::io::Result<PathBuf> {
    let body = render(docs.iter().map(|doc| doc.content.clone()));
    write_dump(dir, dump_file_name(kb_name, doc_name, tag), body).await
}
