//! Knowledge base retrieval.
//!
//! This module provides:
//! - `VectorStore`: the search capability, backed by `SqliteVectorStore`
//! - `Retriever`: single-query or fusion retrieval over a store
//! - `FaqLoader` and the dump helpers for document files

mod document;
pub mod dump;
mod faq_loader;
mod fusion;
mod retrieval;
mod sqlite;
mod store;

pub use document::{DocAnswer, Document, DocumentMetadata, RetrievedDocument};
pub use faq_loader::{FaqLoader, LoaderError};
pub use fusion::{reciprocal_rank_fusion, LlmQueryReformulator, QueryReformulator, DEFAULT_RRF_K};
pub use retrieval::Retriever;
pub use sqlite::SqliteVectorStore;
pub use store::{score_threshold_process, Embedder, ProviderEmbedder, VectorStore};
