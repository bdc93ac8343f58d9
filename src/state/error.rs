use thiserror::Error;

use crate::core::errors::ConfigError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to initialize knowledge base store: {0}")]
    Store(#[source] anyhow::Error),
}
