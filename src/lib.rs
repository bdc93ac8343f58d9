//! Retrieval-augmented chat over named knowledge bases.

pub mod chat;
pub mod core;
pub mod llm;
pub mod rag;
pub mod server;
pub mod state;
