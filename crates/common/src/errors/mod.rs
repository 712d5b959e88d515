//! Error types for the KAS retrieval pipeline
//!
//! Provides:
//! - Distinct error types for each external collaborator failure mode
//! - Machine-readable error codes
//! - Retry classification for the embedding pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // External provider errors (8xxx)
    ProviderUnavailable,
    Timeout,
    InvalidResponse,
    CacheUnavailable,
    PartialBatchFailure,
    UpstreamError,
    CircuitOpen,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::ProviderUnavailable => 8001,
            ErrorCode::Timeout => 8002,
            ErrorCode::InvalidResponse => 8003,
            ErrorCode::CacheUnavailable => 8004,
            ErrorCode::PartialBatchFailure => 8005,
            ErrorCode::UpstreamError => 8006,
            ErrorCode::CircuitOpen => 8007,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // External collaborator errors
    #[error("Provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Invalid response from '{provider}': {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("Cache unavailable: {message}")]
    CacheUnavailable { message: String },

    #[error("Embedding failed for text at index {index} after {attempts} attempts: {message}")]
    PartialBatchFailure {
        index: usize,
        attempts: u32,
        message: String,
    },

    #[error("Circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::InvalidResponse { .. } => ErrorCode::InvalidResponse,
            AppError::CacheUnavailable { .. } => ErrorCode::CacheUnavailable,
            AppError::PartialBatchFailure { .. } => ErrorCode::PartialBatchFailure,
            AppError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether another attempt against the same collaborator may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ProviderUnavailable { .. }
                | AppError::Timeout { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Shorthand for a provider transport failure
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a malformed provider payload
    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::InvalidResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheUnavailable {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::PartialBatchFailure {
            index: 2,
            attempts: 3,
            message: "connection refused".into(),
        };
        assert_eq!(err.code(), ErrorCode::PartialBatchFailure);
        assert_eq!(err.code().as_code(), 8005);
        assert!(err.to_string().contains("index 2"));
    }

    #[test]
    fn test_retry_classification() {
        assert!(AppError::provider("ollama", "refused").is_retryable());
        assert!(AppError::Timeout {
            operation: "embed".into(),
            timeout_ms: 30_000
        }
        .is_retryable());
        assert!(!AppError::invalid_response("ollama", "missing embedding").is_retryable());
        assert!(!AppError::Configuration {
            message: "bad".into()
        }
        .is_retryable());
        // An open circuit already encodes "stop calling for a while"
        assert!(!AppError::CircuitOpen {
            name: "embedding".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::CacheUnavailable).unwrap();
        assert_eq!(json, "\"CACHE_UNAVAILABLE\"");
    }
}
