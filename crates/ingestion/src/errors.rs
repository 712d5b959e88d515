//! Ingestion error types

use kas_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No content to ingest in {0}")]
    EmptyContent(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[source] AppError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<AppError> for IngestionError {
    fn from(e: AppError) -> Self {
        IngestionError::Embedding(e)
    }
}
