pub mod chat;
pub mod health;
pub mod knowledge_base;
